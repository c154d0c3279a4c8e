//! Centralized error types for pstingest.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while reading and parsing mailbox files.
#[derive(Error, Debug)]
pub enum MboxError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("MBOX file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file does not appear to be a valid MBOX.
    #[error("File does not appear to be a valid MBOX: {0}")]
    InvalidMbox(PathBuf),
}

/// Convenience alias for `Result<T, MboxError>`.
pub type Result<T> = std::result::Result<T, MboxError>;

impl MboxError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Record store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store file could not be opened or configured.
    #[error("Cannot open store '{path}': {source}")]
    Connection {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Schema creation or verification failed.
    #[error("Failed to create store at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },

    /// A record is missing a required field.
    #[error("Record is missing required field '{field}'")]
    Validation { field: &'static str },

    /// The lock wait timeout expired.
    #[error("Store is busy - another process holds the lock")]
    Busy,

    /// A constraint rejected the write.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Any other SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Classify a failed write into `Busy`, `Constraint` or a plain SQLite error.
    pub fn from_write(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Busy
            }
            Some(rusqlite::ErrorCode::ConstraintViolation) => Self::Constraint(err.to_string()),
            _ => Self::Sqlite(err),
        }
    }

    /// Validation failures are recovered by dropping the record.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Container discovery and conversion errors.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The source directory does not exist.
    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    /// Walking the source tree failed.
    #[error("Failed to scan '{path}': {reason}")]
    Walk { path: PathBuf, reason: String },

    /// The worker pool could not be built.
    #[error("Failed to create conversion pool: {0}")]
    Pool(String),

    /// I/O error preparing the intermediate directory.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Top-level error type for a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Mailbox parsing errors
    #[error("Mailbox error: {0}")]
    Mbox(#[from] MboxError),

    /// Record store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Conversion errors
    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// I/O error with the associated path.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Extraction was stopped before the end of the mailbox.
    #[error("Ingestion of '{0}' was aborted")]
    Aborted(PathBuf),
}

impl PipelineError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
