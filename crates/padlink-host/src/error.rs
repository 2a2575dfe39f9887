//! Error types for the host SDK.

use padlink_core::ProtocolError;
use thiserror::Error;

/// Errors raised by the signaling channel and relay client.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The relay connection failed or rejected an operation.
    #[error("relay transport error: {0}")]
    Relay(String),

    /// A signaling message could not be serialized for the relay.
    #[error("signaling serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A pending one-shot waiter was cancelled by link teardown.
    #[error("pending signaling waiter was cancelled")]
    Cancelled,
}

/// Errors raised while establishing or using a peer link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Signal(#[from] SignalError),

    /// The configured transport kind is not supported. Raised at
    /// construction, before any connection state exists.
    #[error("unsupported transport kind: {0}")]
    UnsupportedTransport(String),

    /// The underlying peer transport reported a failure.
    #[error("peer transport error: {0}")]
    Transport(String),

    /// An operation needed an open data channel and none exists.
    #[error("data channel is not open")]
    NotConnected,

    /// A pending reply was cancelled by link teardown.
    #[error("pending reply was cancelled by link teardown")]
    Cancelled,

    /// A timed broadcast expired before every device confirmed.
    #[error("timed out waiting for confirmations")]
    Timeout,

    /// A control envelope could not be serialized or parsed.
    #[error("control payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A binary frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl LinkError {
    /// `true` when the error stems from deliberate teardown rather than a
    /// transport fault, so supervisors stop retrying instead of looping.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            LinkError::Cancelled | LinkError::Signal(SignalError::Cancelled)
        )
    }
}
