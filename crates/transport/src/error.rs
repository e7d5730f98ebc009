//! Transport error types.

use thiserror::Error;

use common::SellerId;
use resilience::Retryable;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response arrived within the per-request timeout.
    #[error("request to {peer} timed out after {timeout_ms}ms")]
    Timeout { peer: SellerId, timeout_ms: u64 },

    /// The peer has not connected (or its connection dropped).
    #[error("peer {0} is not connected")]
    PeerUnavailable(SellerId),

    /// The frame could not be handed to the peer's connection.
    #[error("failed to send to {peer}: {reason}")]
    Send { peer: SellerId, reason: String },

    /// A frame violated the wire format.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A frame announced a length above the codec limit.
    #[error("frame of {length} bytes exceeds limit of {limit}")]
    FrameTooLarge { length: usize, limit: usize },

    /// The broker was shut down while the request was outstanding.
    #[error("broker shut down")]
    Shutdown,

    /// The front-end endpoint could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Underlying socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::PeerUnavailable(_)
                | TransportError::Send { .. }
                | TransportError::Io(_)
        )
    }
}
