//! Append-only mutation journal
//!
//! Every committed store mutation is written here before it is applied in
//! memory. One flush batch is one entry, so a batch is either replayed whole or
//! not at all.
//!
//! ## Entry format
//! - `[len: u32][bincode(JournalEntry)][crc32: u32]` (see `storage::checksum`)
//! - A torn entry at the tail is dropped on replay
//! - A corrupt entry in the middle stops replay there; everything after it is
//!   discarded with a warning
//! - Sequence numbers keep counting across truncation; a snapshot records the
//!   first one it does not cover, so entries it already holds are skippable

use crate::config::DurabilityLevel;
use crate::storage::checksum::{Checksum, ChecksumError};
use crate::types::{DayBucket, MergeKey, MergeValue};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Journal sequence number (monotonically increasing for the life of the store)
pub type SequenceNumber = u64;

pub const JOURNAL_FILE: &str = "activity.journal";

/// A committed mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// One flushed batch of merged entries
    Upsert { entries: Vec<(MergeKey, MergeValue)> },

    /// URL scrub; an empty list means every URL
    ScrubUrls { urls: Vec<String> },

    /// Retention expiry: rows in buckets before `cutoff` were deleted
    Expire { cutoff: DayBucket },
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    seq: SequenceNumber,
    record: JournalRecord,
}

pub struct Journal {
    path: PathBuf,
    file: File,
    /// Length of the valid prefix of the file
    len: u64,
    next_seq: SequenceNumber,
    durability: DurabilityLevel,
}

impl Journal {
    /// Open (or create) the journal in `dir` and return it with the records
    /// found in the file, each with its sequence number.
    ///
    /// `first_seq` is the lowest number the next append may use; pass the
    /// sequence recorded by the last snapshot. Records numbered below it can
    /// still be returned when a checkpoint died before truncating the file.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        durability: DurabilityLevel,
        first_seq: SequenceNumber,
    ) -> Result<(Self, Vec<(SequenceNumber, JournalRecord)>)> {
        let path = dir.as_ref().join(JOURNAL_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let (records, valid_len) = Self::scan(&mut file)?;
        let next_seq = records
            .last()
            .map_or(first_seq, |(seq, _)| first_seq.max(seq + 1));

        // Cut off anything past the last good entry so new appends follow it directly.
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "discarding unreadable journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), records = records.len(), next_seq, "journal opened");

        Ok((
            Self {
                path,
                file,
                len: valid_len,
                next_seq,
                durability,
            },
            records,
        ))
    }

    fn scan(file: &mut File) -> Result<(Vec<(SequenceNumber, JournalRecord)>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&*file);
        let mut records: Vec<(SequenceNumber, JournalRecord)> = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let data = match Checksum::read_frame(&mut reader) {
                Ok(Some(data)) => data,
                Ok(None) => break,
                Err(ChecksumError::Truncated) => {
                    warn!("journal ends in a partial entry");
                    break;
                }
                Err(ChecksumError::Io(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "corrupt journal entry, stopping replay");
                    break;
                }
            };

            let entry: JournalEntry = match bincode::deserialize(&data) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "undecodable journal entry, stopping replay");
                    break;
                }
            };
            // The first entry may carry any number; the rest must follow it.
            if let Some(&(last, _)) = records.last() {
                if entry.seq != last + 1 {
                    warn!(expected = last + 1, found = entry.seq, "journal sequence gap, stopping replay");
                    break;
                }
            }

            valid_len += (data.len() + crate::storage::checksum::FRAME_OVERHEAD) as u64;
            records.push((entry.seq, entry.record));
        }

        Ok((records, valid_len))
    }

    /// Append one record as one frame.
    pub fn append(&mut self, record: &JournalRecord) -> Result<SequenceNumber> {
        let seq = self.next_seq;
        let data = bincode::serialize(&JournalEntryRef { seq, record })?;
        let frame = Checksum::encode_frame(&data);

        let written = self.file.write_all(&frame).and_then(|_| {
            if self.durability.requires_immediate_sync() {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // Roll back a partial frame so a retry does not land after garbage.
            if let Err(trunc) = self.file.set_len(self.len) {
                warn!(path = %self.path.display(), error = %trunc, "failed to roll back journal append");
            }
            return Err(e.into());
        }

        self.len += frame.len() as u64;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Drop every entry. Called once a snapshot covering them is durable.
    /// Numbering continues where it was.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_seq(&self) -> SequenceNumber {
        self.next_seq
    }
}

/// Borrowing twin of `JournalEntry`; bincode encodes both identically.
#[derive(Serialize)]
struct JournalEntryRef<'a> {
    seq: SequenceNumber,
    record: &'a JournalRecord,
}
