//! Session-level errors.

use thiserror::Error;

use crate::files::FileTransferError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SessionError {
    /// The device ID is not known yet. Retry once a report has arrived.
    #[error("Device ID not known yet")]
    NotReady,

    #[error("No printer host configured")]
    MissingHost,

    #[error("Failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("File transfer error: {0}")]
    Files(#[from] FileTransferError),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::NotReady)
    }
}
