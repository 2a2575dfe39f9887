//! Peer transport seams and the link state machine.
//!
//! The negotiation and reconnection logic in [`link::PeerLink`] is written
//! against three object-safe traits so tests can drive it with the in-memory
//! implementations in [`mock`] while production uses the WebRTC endpoint in
//! [`webrtc`]:
//!
//! - [`PeerConnector`] creates one fresh [`PeerEndpoint`] per negotiation
//!   attempt, together with its event stream.
//! - [`PeerEndpoint`] is the session-description engine: it consumes the
//!   remote offer and candidates and produces the local answer.
//! - [`DataChannel`] is the negotiated channel itself: text/binary sends,
//!   message-size and buffered-amount reporting, and an optional drain
//!   signal for flow control.

pub mod link;
pub mod mock;
pub mod webrtc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use padlink_core::IceCandidate;
use tokio::sync::{mpsc, Notify};

use crate::error::LinkError;

/// One inbound message from the remote peer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Control-plane JSON rides the text path.
    Text(String),
    /// Event and chunk frames ride the binary path.
    Binary(Vec<u8>),
}

/// Events surfaced by a peer endpoint while its connection lives.
pub enum EndpointEvent {
    /// A locally-gathered ICE candidate to publish through the relay.
    LocalCandidate(IceCandidate),
    /// The negotiated data channel reported ready.
    ChannelOpen {
        channel: Arc<dyn DataChannel>,
        messages: mpsc::Receiver<ChannelMessage>,
    },
    /// The underlying connection closed or failed.
    Closed,
}

/// Creates one endpoint per negotiation attempt.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Opens a fresh endpoint and its event stream.
    async fn open_endpoint(
        &self,
    ) -> Result<(Arc<dyn PeerEndpoint>, mpsc::Receiver<EndpointEvent>), LinkError>;
}

/// The session-description engine behind one connection attempt.
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    /// Applies the remote peer's offer as the remote description.
    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), LinkError>;

    /// Creates the local answer, applies it locally, and returns its SDP.
    async fn create_answer(&self) -> Result<String, LinkError>;

    /// Applies one remote ICE candidate. Requires the remote description to
    /// be set; the link buffers earlier candidates.
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), LinkError>;

    /// Releases the underlying connection.
    async fn close(&self);
}

/// The negotiated point-to-point channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Sends one text message (control plane).
    async fn send_text(&self, text: &str) -> Result<(), LinkError>;

    /// Sends one binary message (event or chunk frame).
    async fn send_binary(&self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Largest message the channel accepts, in bytes.
    fn max_message_size(&self) -> usize;

    /// Bytes queued locally but not yet handed to the transport.
    async fn buffered_amount(&self) -> usize;

    /// Notified when the buffered amount drains below the channel's
    /// low-water mark. `None` when the transport cannot report drain events;
    /// senders then proceed unthrottled.
    fn drain_signal(&self) -> Option<Arc<Notify>>;

    /// Closes the channel; the inbound message stream ends.
    async fn close(&self);
}

/// Governs reconnection attempts after a transport-level close.
///
/// The default policy retries forever with no backoff, matching the link
/// contract that reconnection is unconditional and unbounded; tests inject
/// [`BoundedRetries`] to bound it.
#[cfg_attr(test, mockall::automock)]
pub trait RetryPolicy: Send + Sync {
    /// Delay before reconnect attempt `attempt` (1-based). `None` stops the
    /// supervisor for good.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Reconnects immediately, forever.
pub struct ReconnectForever;

impl RetryPolicy for ReconnectForever {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Retries up to `max_attempts` times with a fixed delay in between.
pub struct BoundedRetries {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy for BoundedRetries {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_attempts).then_some(self.delay)
    }
}
