use crate::comparator::MismatchReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serial error: {0}")]
    Serial(String),

    #[error("Data integrity mismatch at offset {} (0x{:x})", .0.offset, .0.offset)]
    Integrity(Box<MismatchReport>),
}

impl Error {
    /// Returns `true` if this error means the received stream can no longer be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
