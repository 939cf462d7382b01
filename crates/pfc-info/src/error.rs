use std::io;

use thiserror::Error;

/// Errors that can occur while reading or writing a cache descriptor.
///
/// None of these are fatal: a failed read means "no usable descriptor, start
/// fresh", a failed write means "this checkpoint did not persist".
#[derive(Error, Debug)]
pub enum InfoError {
    #[error("short read of {field} at offset {offset}: wanted {expected} bytes, got {got}")]
    ShortRead {
        field: &'static str,
        offset: u64,
        expected: usize,
        got: usize,
    },

    #[error("short write of {field} at offset {offset}: wanted {expected} bytes, wrote {written}")]
    ShortWrite {
        field: &'static str,
        offset: u64,
        expected: usize,
        written: usize,
    },

    #[error("bitmap checksum mismatch: stored {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unsupported descriptor version: {0}")]
    UnsupportedVersion(i32),

    #[error("descriptor is locked by another writer")]
    LockContention,

    #[error("invalid geometry: block_size={block_size} file_size={file_size}")]
    InvalidGeometry { block_size: i128, file_size: i128 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl InfoError {
    /// Short name of the failure kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            InfoError::ShortRead { .. } => "short-read",
            InfoError::ShortWrite { .. } => "short-write",
            InfoError::ChecksumMismatch { .. } => "checksum-mismatch",
            InfoError::UnsupportedVersion(_) => "unsupported-version",
            InfoError::LockContention => "lock-contention",
            InfoError::InvalidGeometry { .. } => "invalid-geometry",
            InfoError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, InfoError>;
