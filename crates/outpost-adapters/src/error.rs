//! Unified error model for outbound adapters

use outpost_transport::DialError;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for all adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The protocol client rejected the static options.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// The flow descriptor cannot be expressed as a protocol destination.
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Raw connect to the proxy server failed or timed out.
    #[error("{server} connect failed: {source}")]
    Dial {
        server: String,
        #[source]
        source: DialError,
    },

    /// The protocol client failed during handshake; `source` is its error as-is.
    #[error("{server} handshake failed: {source}")]
    Handshake {
        server: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Handshake timeout after {0:?}")]
    Timeout(Duration),

    #[error("Dial cancelled")]
    Cancelled,

    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl AdapterError {
    pub fn config(reason: impl std::fmt::Display) -> Self {
        Self::Config {
            reason: reason.to_string(),
        }
    }

    /// Whether the error happened before any network activity.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidDestination(_))
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::Io(err)
    }
}

/// Adapter-specific result type
pub type Result<T, E = AdapterError> = std::result::Result<T, E>;
