//! Error types for the activity log store

use crate::storage::checksum::ChecksumError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Activity log is closed")]
    Closed,

    #[error("Timed out after {0:?} waiting for the writer")]
    Timeout(Duration),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
