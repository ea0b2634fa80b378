//! CRC32 framing shared by the journal and the snapshot file.
//!
//! Frame layout: `[data_len: u32 LE][data][crc32: u32 LE]`.
//!
//! ```ignore
//! let frame = Checksum::encode_frame(b"payload");
//! let data = Checksum::decode_frame(&frame)?;
//! ```

use crc32fast::Hasher;
use std::io::{self, Read};

/// Length prefix plus trailing checksum.
pub const FRAME_OVERHEAD: usize = 8;

pub struct Checksum;

impl Checksum {
    pub fn compute(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn verify(data: &[u8], expected: u32) -> Result<(), ChecksumError> {
        let actual = Self::compute(data);
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                expected,
                actual,
                data_len: data.len(),
            });
        }
        Ok(())
    }

    pub fn encode_frame(data: &[u8]) -> Vec<u8> {
        let checksum = Self::compute(data);
        let mut encoded = Vec::with_capacity(FRAME_OVERHEAD + data.len());
        encoded.extend_from_slice(&(data.len() as u32).to_le_bytes());
        encoded.extend_from_slice(data);
        encoded.extend_from_slice(&checksum.to_le_bytes());
        encoded
    }

    /// Decode a single complete frame held in memory.
    pub fn decode_frame(encoded: &[u8]) -> Result<Vec<u8>, ChecksumError> {
        if encoded.len() < FRAME_OVERHEAD {
            return Err(ChecksumError::InvalidFormat("frame too short".to_string()));
        }

        let data_len = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        if encoded.len() != FRAME_OVERHEAD + data_len {
            return Err(ChecksumError::InvalidFormat(format!(
                "expected {} bytes, got {}",
                FRAME_OVERHEAD + data_len,
                encoded.len()
            )));
        }

        let data = &encoded[4..4 + data_len];
        let tail = &encoded[4 + data_len..];
        let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        Self::verify(data, expected)?;

        Ok(data.to_vec())
    }

    /// Read the next frame from a stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream and `Err(ChecksumError::Truncated)`
    /// when the stream ends in the middle of a frame (a torn append).
    pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, ChecksumError> {
        let mut len_buf = [0u8; 4];
        match read_full(reader, &mut len_buf)? {
            0 => return Ok(None),
            4 => {}
            _ => return Err(ChecksumError::Truncated),
        }

        let data_len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; data_len + 4];
        if read_full(reader, &mut body)? != body.len() {
            return Err(ChecksumError::Truncated);
        }

        let expected = u32::from_le_bytes([
            body[data_len],
            body[data_len + 1],
            body[data_len + 2],
            body[data_len + 3],
        ]);
        body.truncate(data_len);
        Self::verify(&body, expected)?;

        Ok(Some(body))
    }
}

/// Like `read_exact`, but reports how many bytes were available instead of failing on EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x} (data_len={data_len})")]
    Mismatch {
        expected: u32,
        actual: u32,
        data_len: usize,
    },

    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),

    #[error("Truncated frame")]
    Truncated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
