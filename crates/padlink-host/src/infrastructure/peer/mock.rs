//! In-memory peer transport for unit and integration tests.
//!
//! [`MockConnector`] stands in for the WebRTC connector: every negotiation
//! attempt yields a scriptable [`MockEndpointHandle`] through which a test
//! plays the remote controller — observing the applied offer and candidates,
//! emitting local candidates, opening an in-memory data channel, and cutting
//! the connection to exercise reconnection.
//!
//! The [`MemoryChannel`] enforces the same preconditions the real transport
//! does (no candidates before the remote description, bounded message size),
//! so ordering bugs in the link machinery fail loudly in tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use padlink_core::IceCandidate;
use tokio::sync::{mpsc, Notify};

use super::{ChannelMessage, DataChannel, EndpointEvent, PeerConnector, PeerEndpoint};
use crate::error::LinkError;

// ── Connector ─────────────────────────────────────────────────────────────────

/// Scriptable [`PeerConnector`]; hand the paired [`MockControl`] to the test.
pub struct MockConnector {
    handles_tx: mpsc::UnboundedSender<MockEndpointHandle>,
    fail_next: Mutex<Option<String>>,
    attempts: AtomicU32,
}

/// Test-side controller over every endpoint the connector has produced.
pub struct MockControl {
    handles: mpsc::UnboundedReceiver<MockEndpointHandle>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, MockControl) {
        let (handles_tx, handles) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                handles_tx,
                fail_next: Mutex::new(None),
                attempts: AtomicU32::new(0),
            }),
            MockControl { handles },
        )
    }

    /// Makes the next `open_endpoint` call fail with a transport error.
    pub fn fail_next(&self, reason: &str) {
        *self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    /// Number of endpoints opened so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl MockControl {
    /// Waits for the link to open its next endpoint.
    pub async fn next_endpoint(&mut self) -> MockEndpointHandle {
        self.handles.recv().await.expect("connector was dropped")
    }

    /// Returns an already-opened endpoint without waiting, if any.
    pub fn try_next_endpoint(&mut self) -> Option<MockEndpointHandle> {
        self.handles.try_recv().ok()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn open_endpoint(
        &self,
    ) -> Result<(Arc<dyn PeerEndpoint>, mpsc::Receiver<EndpointEvent>), LinkError> {
        if let Some(reason) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(LinkError::Transport(reason));
        }

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let (event_tx, event_rx) = mpsc::channel(16);
        let (offer_tx, offer_rx) = mpsc::unbounded_channel();
        let (answer_tx, answer_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(EndpointShared {
            offer_tx,
            answer_tx,
            answer_sdp: format!("v=0 mock answer {attempt}"),
            candidates: Mutex::new(Vec::new()),
            remote_ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let handle = MockEndpointHandle {
            shared: Arc::clone(&shared),
            offer_rx,
            answer_rx,
            event_tx,
        };
        let _ = self.handles_tx.send(handle);

        Ok((Arc::new(MockEndpoint { shared }), event_rx))
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

struct EndpointShared {
    offer_tx: mpsc::UnboundedSender<String>,
    answer_tx: mpsc::UnboundedSender<String>,
    answer_sdp: String,
    candidates: Mutex<Vec<IceCandidate>>,
    remote_ready: AtomicBool,
    closed: AtomicBool,
}

/// The link-side half of a scripted endpoint.
pub struct MockEndpoint {
    shared: Arc<EndpointShared>,
}

#[async_trait]
impl PeerEndpoint for MockEndpoint {
    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), LinkError> {
        self.shared.remote_ready.store(true, Ordering::Release);
        let _ = self.shared.offer_tx.send(sdp.to_string());
        Ok(())
    }

    async fn create_answer(&self) -> Result<String, LinkError> {
        let _ = self.shared.answer_tx.send(self.shared.answer_sdp.clone());
        Ok(self.shared.answer_sdp.clone())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), LinkError> {
        // The real engine rejects candidates until the remote description is
        // set; enforcing it here makes buffering bugs fail the tests.
        if !self.shared.remote_ready.load(Ordering::Acquire) {
            return Err(LinkError::Transport(
                "candidate applied before the remote description".to_string(),
            ));
        }
        self.shared
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(candidate.clone());
        Ok(())
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// The test-side half of a scripted endpoint.
pub struct MockEndpointHandle {
    shared: Arc<EndpointShared>,
    offer_rx: mpsc::UnboundedReceiver<String>,
    answer_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::Sender<EndpointEvent>,
}

impl MockEndpointHandle {
    /// Waits until the link applies a remote offer; returns its SDP.
    pub async fn wait_remote_offer(&mut self) -> String {
        self.offer_rx.recv().await.expect("endpoint was dropped")
    }

    /// Waits until the link creates its answer; returns its SDP.
    pub async fn wait_answer(&mut self) -> String {
        self.answer_rx.recv().await.expect("endpoint was dropped")
    }

    /// Remote candidates the link has applied, in order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.shared
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Emits a locally-gathered candidate for the link to publish.
    pub async fn emit_candidate(&self, candidate: IceCandidate) {
        let _ = self
            .event_tx
            .send(EndpointEvent::LocalCandidate(candidate))
            .await;
    }

    /// Reports the connection as failed/closed.
    pub async fn emit_closed(&self) {
        let _ = self.event_tx.send(EndpointEvent::Closed).await;
    }

    /// Opens the in-memory data channel and reports it ready to the link.
    pub async fn open_channel(
        &self,
        max_message_size: usize,
        with_drain: bool,
    ) -> MemoryChannelDriver {
        let (channel, messages, driver) = MemoryChannel::with_driver(max_message_size, with_drain);
        let _ = self
            .event_tx
            .send(EndpointEvent::ChannelOpen { channel, messages })
            .await;
        driver
    }

    /// Whether the link has released this endpoint.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

// ── Data channel ──────────────────────────────────────────────────────────────

type InboundSlot = Arc<Mutex<Option<mpsc::Sender<ChannelMessage>>>>;

/// In-memory [`DataChannel`] with test-controlled buffering behaviour.
pub struct MemoryChannel {
    sent_tx: mpsc::UnboundedSender<ChannelMessage>,
    inbound: InboundSlot,
    buffered: AtomicUsize,
    drain: Option<Arc<Notify>>,
    max_message_size: usize,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Builds the channel, its inbound message stream, and the test driver.
    pub fn with_driver(
        max_message_size: usize,
        with_drain: bool,
    ) -> (
        Arc<Self>,
        mpsc::Receiver<ChannelMessage>,
        MemoryChannelDriver,
    ) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, messages) = mpsc::channel(256);
        let inbound: InboundSlot = Arc::new(Mutex::new(Some(inbound_tx)));
        let channel = Arc::new(Self {
            sent_tx,
            inbound: Arc::clone(&inbound),
            buffered: AtomicUsize::new(0),
            drain: with_drain.then(|| Arc::new(Notify::new())),
            max_message_size,
            closed: AtomicBool::new(false),
        });
        let driver = MemoryChannelDriver {
            channel: Arc::clone(&channel),
            sent: sent_rx,
            inbound,
        };
        (channel, messages, driver)
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected);
        }
        let _ = self.sent_tx.send(ChannelMessage::Text(text.to_string()));
        Ok(())
    }

    async fn send_binary(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected);
        }
        if bytes.len() > self.max_message_size {
            return Err(LinkError::Transport(format!(
                "message of {} bytes exceeds the {}-byte channel limit",
                bytes.len(),
                self.max_message_size
            )));
        }
        let _ = self.sent_tx.send(ChannelMessage::Binary(bytes.to_vec()));
        Ok(())
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn drain_signal(&self) -> Option<Arc<Notify>> {
        self.drain.clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Test-side driver for one [`MemoryChannel`].
pub struct MemoryChannelDriver {
    channel: Arc<MemoryChannel>,
    sent: mpsc::UnboundedReceiver<ChannelMessage>,
    inbound: InboundSlot,
}

impl MemoryChannelDriver {
    /// Next message the host sent on the channel.
    pub async fn next_sent(&mut self) -> Option<ChannelMessage> {
        self.sent.recv().await
    }

    /// Delivers a text message to the host.
    pub async fn inject_text(&self, text: &str) {
        let tx = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(tx) = tx {
            let _ = tx.send(ChannelMessage::Text(text.to_string())).await;
        }
    }

    /// Delivers a binary frame to the host.
    pub async fn inject_binary(&self, bytes: &[u8]) {
        let tx = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(tx) = tx {
            let _ = tx.send(ChannelMessage::Binary(bytes.to_vec())).await;
        }
    }

    /// Sets the reported buffered byte count.
    pub fn set_buffered_amount(&self, bytes: usize) {
        self.channel.buffered.store(bytes, Ordering::Release);
    }

    /// Fires the buffered-amount-low notification.
    pub fn notify_drain(&self) {
        if let Some(drain) = &self.channel.drain {
            drain.notify_one();
        }
    }

    /// Simulates a transport-level close: the host's inbound stream ends.
    pub fn close(&self) {
        self.channel.closed.store(true, Ordering::Release);
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// The channel as the host sees it.
    pub fn channel(&self) -> Arc<MemoryChannel> {
        Arc::clone(&self.channel)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
