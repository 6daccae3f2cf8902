use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransferError {
    /// Malformed or incomplete frame header.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transfer truncated: expected {expected} bytes, received {received}")]
    TruncatedTransfer { expected: u64, received: u64 },

    /// Names that would escape the output directory or break the header.
    #[error("invalid filename {0:?}")]
    InvalidFilename(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransferError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether the stream is still positioned at a frame boundary, so the
    /// next frame on it can still be read.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidFilename(_))
    }
}
