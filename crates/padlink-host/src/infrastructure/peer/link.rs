//! The peer link: one negotiated channel to one remote controller,
//! maintained across reconnects.
//!
//! The link is the responder in every negotiation:
//!
//! ```text
//! AwaitingRemoteOffer ──offer──► apply remote description
//!                                 replay buffered candidates
//!                     Negotiating: create + publish answer
//!                            Open: data channel reported ready
//!                          Closed: transport close → new attempt with a
//!                                  fresh marker, same LinkId, same Device
//! ```
//!
//! ICE candidates frequently arrive interleaved with, or before, the SDP
//! offer; candidates seen before the remote description exists are held in a
//! mutex-guarded buffer and replayed right after the offer is applied —
//! dropping them would fail the connection under common network timing.
//! Candidates carrying this link's own marker are publishes looped back by
//! the relay and are ignored.
//!
//! A transport-level close triggers a fresh attempt governed by the injected
//! [`RetryPolicy`] (unbounded by default). `disconnect()` is terminal: it
//! suppresses reconnection and resolves every pending reply with a
//! cancellation instead of leaving it dangling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use padlink_core::{
    ConnectionState, ControlEnvelope, IceCandidate, LinkId, SignalKind, SignalMessage,
};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChannelMessage, DataChannel, EndpointEvent, PeerConnector, PeerEndpoint, RetryPolicy};
use crate::error::LinkError;
use crate::infrastructure::signaling::{SignalSubscription, SignalingChannel};

type ControlCallback = Arc<dyn Fn(&ControlEnvelope) + Send + Sync>;
type BinaryCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Default)]
struct ControlRoutes {
    /// One-shot reply waiters, drained (all of them) by the next matching
    /// envelope, cancelled by teardown.
    once: HashMap<String, Vec<oneshot::Sender<ControlEnvelope>>>,
    /// Durable envelope subscribers, removable individually.
    subscribers: HashMap<String, Vec<(u64, ControlCallback)>>,
}

/// Everything owned by one successful negotiation attempt.
struct Session {
    endpoint: Arc<dyn PeerEndpoint>,
    events: mpsc::Receiver<EndpointEvent>,
    channel: Arc<dyn DataChannel>,
    messages: mpsc::Receiver<ChannelMessage>,
    remote_candidates: mpsc::UnboundedReceiver<IceCandidate>,
    mark: String,
    /// Keeps this attempt's candidate listener registered for the session
    /// lifetime; dropping the session unsubscribes it.
    _candidate_sub: SignalSubscription,
}

/// One point-to-point link with a stable identity across reconnects.
pub struct PeerLink {
    id: LinkId,
    signaling: Arc<SignalingChannel>,
    connector: Arc<dyn PeerConnector>,
    retry: Arc<dyn RetryPolicy>,
    state: watch::Sender<ConnectionState>,
    channel: RwLock<Option<Arc<dyn DataChannel>>>,
    control: Arc<Mutex<ControlRoutes>>,
    binary: Arc<Mutex<Vec<(u64, BinaryCallback)>>>,
    next_subscription: AtomicU64,
    /// `true` after a terminal disconnect; wait points select on it so an
    /// in-flight attempt stops instead of dangling.
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PeerLink {
    /// Establishes the first connection for `id` and starts the reconnect
    /// supervisor.
    ///
    /// # Errors
    ///
    /// A failure during this initial negotiation is returned to the caller —
    /// automatic reconnection covers transport-level closes after the link
    /// was open, not initial setup failures.
    pub async fn connect(
        id: LinkId,
        signaling: Arc<SignalingChannel>,
        connector: Arc<dyn PeerConnector>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Result<Arc<Self>, LinkError> {
        let link = Arc::new(Self::new(id, signaling, connector, retry));
        let session = link.establish().await?;
        link.adopt(&session).await;
        Arc::clone(&link).spawn_supervisor(session);
        Ok(link)
    }

    pub(crate) fn new(
        id: LinkId,
        signaling: Arc<SignalingChannel>,
        connector: Arc<dyn PeerConnector>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            signaling,
            connector,
            retry,
            state,
            channel: RwLock::new(None),
            control: Arc::new(Mutex::new(ControlRoutes::default())),
            binary: Arc::new(Mutex::new(Vec::new())),
            next_subscription: AtomicU64::new(0),
            shutdown,
            supervisor: Mutex::new(None),
        }
    }

    /// The stable identifier of this link.
    pub fn id(&self) -> &LinkId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A watcher over lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The open data channel, or [`LinkError::NotConnected`].
    pub async fn open_channel(&self) -> Result<Arc<dyn DataChannel>, LinkError> {
        self.channel
            .read()
            .await
            .clone()
            .ok_or(LinkError::NotConnected)
    }

    /// Sends one control-plane text message.
    pub async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        self.open_channel().await?.send_text(text).await
    }

    /// Sends one binary frame.
    pub async fn send_binary(&self, bytes: &[u8]) -> Result<(), LinkError> {
        self.open_channel().await?.send_binary(bytes).await
    }

    /// Largest message the current channel accepts; 0 while disconnected.
    pub async fn max_message_size(&self) -> usize {
        self.channel
            .read()
            .await
            .as_ref()
            .map(|channel| channel.max_message_size())
            .unwrap_or(0)
    }

    /// Returns a future for the next control envelope of `kind`.
    ///
    /// Repeated calls create independent waiters; all of them resolve with
    /// the same next envelope. Teardown resolves pending waiters with
    /// [`LinkError::Cancelled`].
    pub fn once_control(&self, kind: &str) -> ControlReply {
        let (tx, rx) = oneshot::channel();
        if *self.shutdown.borrow() {
            // Terminally closed: resolve as cancelled instead of queueing a
            // waiter nothing will ever match.
            drop(tx);
        } else {
            self.lock_control()
                .once
                .entry(kind.to_string())
                .or_default()
                .push(tx);
        }
        ControlReply { rx }
    }

    /// Registers a durable listener for control envelopes of `kind`.
    pub fn subscribe_control(
        &self,
        kind: &str,
        callback: impl Fn(&ControlEnvelope) + Send + Sync + 'static,
    ) -> ControlSubscription {
        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.lock_control()
            .subscribers
            .entry(kind.to_string())
            .or_default()
            .push((subscription_id, Arc::new(callback)));
        ControlSubscription {
            control: Arc::downgrade(&self.control),
            kind: kind.to_string(),
            subscription_id,
        }
    }

    /// Registers a listener for raw inbound binary frames.
    pub fn subscribe_binary(
        &self,
        callback: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> BinarySubscription {
        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.lock_binary().push((subscription_id, Arc::new(callback)));
        BinarySubscription {
            binary: Arc::downgrade(&self.binary),
            subscription_id,
        }
    }

    /// Tears the link down for good: closes the channel, suppresses
    /// reconnection, and cancels pending waiters. The link stays usable
    /// only through an explicit [`PeerLink::reconnect`].
    pub async fn disconnect(&self) {
        self.shutdown.send_replace(true);
        // Wake a pending offer waiter so an in-flight attempt stops instead
        // of blocking on the relay forever.
        self.signaling.cancel_link(&self.id);
        if let Some(channel) = self.channel.write().await.take() {
            channel.close().await;
        }
        // Wait the supervisor out so no attempt survives the teardown.
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.await;
        }
        self.set_state(ConnectionState::Closed);
        self.cancel_pending_replies();
        info!(link = %self.id, "peer link disconnected");
    }

    /// Re-establishes a link that was terminally closed (after
    /// [`PeerLink::disconnect`] or an exhausted retry policy), keeping the
    /// same identity. Transport-level closes reconnect automatically and do
    /// not need this.
    ///
    /// # Errors
    ///
    /// Fails while the link is still active, and propagates negotiation
    /// errors like the initial connect.
    pub async fn reconnect(self: Arc<Self>) -> Result<(), LinkError> {
        {
            let supervisor = self
                .supervisor
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
                return Err(LinkError::Transport(
                    "link is still active; disconnect first".to_string(),
                ));
            }
        }
        self.shutdown.send_replace(false);
        let session = self.establish().await?;
        self.adopt(&session).await;
        Arc::clone(&self).spawn_supervisor(session);
        Ok(())
    }

    // ── Negotiation ───────────────────────────────────────────────────────────

    /// Runs one full negotiation attempt and returns the open session.
    async fn establish(&self) -> Result<Session, LinkError> {
        self.set_state(ConnectionState::AwaitingRemoteOffer);
        let mark = Uuid::new_v4().simple().to_string();

        let (endpoint, mut events) = self.connector.open_endpoint().await?;

        // Candidates seen before the remote description exists wait here.
        // The flag is flipped under the same lock that guards the buffer so
        // no candidate can slip between replay and live delivery.
        let pending: Arc<Mutex<Vec<IceCandidate>>> = Arc::new(Mutex::new(Vec::new()));
        let remote_ready = Arc::new(AtomicBool::new(false));
        let (candidate_tx, mut remote_candidates) = mpsc::unbounded_channel();

        let offer_wait = self.signaling.once(&self.id, SignalKind::Offer);
        let candidate_sub = {
            let pending = Arc::clone(&pending);
            let remote_ready = Arc::clone(&remote_ready);
            let own_mark = mark.clone();
            self.signaling
                .subscribe(&self.id, SignalKind::Candidate, move |message| {
                    let SignalMessage::Candidate { mark, data } = message else {
                        return;
                    };
                    if *mark == own_mark {
                        // Our own publish looped back through the relay.
                        return;
                    }
                    let mut held = pending.lock().unwrap_or_else(PoisonError::into_inner);
                    if remote_ready.load(Ordering::Acquire) {
                        drop(held);
                        let _ = candidate_tx.send(data.clone());
                    } else {
                        held.push(data.clone());
                    }
                })
        };

        // Everything that can fail runs in this block so one error path
        // closes the endpoint; dropping a connection without close() leaks
        // its transport resources.
        let negotiation = async {
            // Join the relay channel only after the local routes exist so
            // nothing delivered from here on can be missed. Joining again on
            // reconnect is a no-op.
            self.signaling.open_link(&self.id).await?;

            let offer = offer_wait.recv().await?;
            let SignalMessage::Offer { sdp } = offer else {
                return Err(LinkError::Transport(
                    "offer waiter resolved with a non-offer message".to_string(),
                ));
            };
            debug!(link = %self.id, "offer received, applying remote description");
            endpoint.apply_remote_offer(&sdp).await?;

            // Flip to live delivery and take whatever raced ahead of the
            // offer.
            let held: Vec<IceCandidate> = {
                let mut held = pending.lock().unwrap_or_else(PoisonError::into_inner);
                remote_ready.store(true, Ordering::Release);
                held.drain(..).collect()
            };
            for candidate in held {
                if let Err(e) = endpoint.add_remote_candidate(&candidate).await {
                    warn!(link = %self.id, "buffered candidate rejected: {e}");
                }
            }

            self.set_state(ConnectionState::Negotiating);
            let answer_sdp = endpoint.create_answer().await?;
            self.signaling
                .publish(&self.id, &SignalMessage::Answer { sdp: answer_sdp })
                .await?;
            debug!(link = %self.id, "answer published, waiting for the data channel");

            // Wait for the channel, forwarding candidates both ways
            // meanwhile. A terminal disconnect interrupts the wait.
            let mut shutdown = self.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                        break Err(LinkError::Cancelled);
                    }
                    event = events.recv() => match event {
                        Some(EndpointEvent::LocalCandidate(candidate)) => {
                            self.publish_candidate(&mark, candidate).await;
                        }
                        Some(EndpointEvent::ChannelOpen { channel, messages }) => {
                            break Ok((channel, messages));
                        }
                        Some(EndpointEvent::Closed) | None => {
                            break Err(LinkError::Transport(
                                "connection closed during negotiation".to_string(),
                            ));
                        }
                    },
                    Some(candidate) = remote_candidates.recv() => {
                        if let Err(e) = endpoint.add_remote_candidate(&candidate).await {
                            warn!(link = %self.id, "remote candidate rejected: {e}");
                        }
                    }
                }
            }
        };

        match negotiation.await {
            Ok((channel, messages)) => Ok(Session {
                endpoint,
                events,
                channel,
                messages,
                remote_candidates,
                mark,
                _candidate_sub: candidate_sub,
            }),
            Err(e) => {
                endpoint.close().await;
                Err(e)
            }
        }
    }

    /// Publishes the adopted session's channel as the link's open channel.
    async fn adopt(&self, session: &Session) {
        *self.channel.write().await = Some(Arc::clone(&session.channel));
        self.set_state(ConnectionState::Open);
        info!(link = %self.id, "peer link open");
    }

    /// Owns the link lifecycle after the first successful negotiation:
    /// pumps the open session, then re-establishes per the retry policy
    /// until the policy gives up or the link is disconnected.
    fn spawn_supervisor(self: Arc<Self>, first: Session) {
        let link = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut session = Some(first);
            let mut attempt: u32 = 0;
            loop {
                let current = match session.take() {
                    Some(current) => current,
                    None => {
                        attempt += 1;
                        let Some(delay) = self.retry.next_delay(attempt) else {
                            debug!(link = %self.id, "retry policy stopped after {attempt} attempts");
                            break;
                        };
                        if !delay.is_zero() {
                            let mut shutdown = self.shutdown.subscribe();
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown.wait_for(|stop| *stop) => break,
                            }
                        }
                        if *self.shutdown.borrow() {
                            break;
                        }
                        match self.establish().await {
                            Ok(next) => {
                                attempt = 0;
                                self.adopt(&next).await;
                                next
                            }
                            Err(e) if e.is_cancellation() => break,
                            Err(e) => {
                                warn!(link = %self.id, "reconnect attempt failed: {e}");
                                continue;
                            }
                        }
                    }
                };

                self.pump(current).await;
                *self.channel.write().await = None;
                self.set_state(ConnectionState::Closed);
                if *self.shutdown.borrow() {
                    break;
                }
                info!(link = %self.id, "channel closed, reconnecting");
            }
            self.set_state(ConnectionState::Closed);
            self.cancel_pending_replies();
        });
        *link
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Delivers inbound traffic for one open session until it closes.
    async fn pump(&self, mut session: Session) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                message = session.messages.recv() => match message {
                    Some(ChannelMessage::Text(text)) => self.dispatch_text(&text),
                    Some(ChannelMessage::Binary(bytes)) => self.dispatch_binary(&bytes),
                    None => break,
                },
                event = session.events.recv() => match event {
                    Some(EndpointEvent::LocalCandidate(candidate)) => {
                        self.publish_candidate(&session.mark, candidate).await;
                    }
                    Some(EndpointEvent::ChannelOpen { .. }) => {
                        debug!(link = %self.id, "ignoring duplicate channel-open event");
                    }
                    Some(EndpointEvent::Closed) | None => break,
                },
                Some(candidate) = session.remote_candidates.recv() => {
                    if let Err(e) = session.endpoint.add_remote_candidate(&candidate).await {
                        warn!(link = %self.id, "remote candidate rejected: {e}");
                    }
                }
            }
        }
        session.endpoint.close().await;
        // Dropping the session unsubscribes this attempt's candidate listener.
    }

    async fn publish_candidate(&self, mark: &str, candidate: IceCandidate) {
        let message = SignalMessage::Candidate {
            mark: mark.to_string(),
            data: candidate,
        };
        if let Err(e) = self.signaling.publish(&self.id, &message).await {
            warn!(link = %self.id, "failed to publish local candidate: {e}");
        }
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    pub(crate) fn dispatch_text(&self, text: &str) {
        let envelope: ControlEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(link = %self.id, "discarding unparseable control message: {e}");
                return;
            }
        };
        let (waiters, callbacks) = {
            let mut control = self.lock_control();
            let waiters = control.once.remove(&envelope.kind).unwrap_or_default();
            let callbacks: Vec<ControlCallback> = control
                .subscribers
                .get(&envelope.kind)
                .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();
            (waiters, callbacks)
        };
        for waiter in waiters {
            let _ = waiter.send(envelope.clone());
        }
        for callback in callbacks {
            callback(&envelope);
        }
    }

    pub(crate) fn dispatch_binary(&self, bytes: &[u8]) {
        let callbacks: Vec<BinaryCallback> = self
            .lock_binary()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(bytes);
        }
    }

    fn cancel_pending_replies(&self) {
        // Dropping the senders resolves every waiter with Cancelled.
        self.lock_control().once.clear();
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    fn lock_control(&self) -> MutexGuard<'_, ControlRoutes> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_binary(&self) -> MutexGuard<'_, Vec<(u64, BinaryCallback)>> {
        self.binary.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single-resolution future for the next control envelope of one kind.
pub struct ControlReply {
    rx: oneshot::Receiver<ControlEnvelope>,
}

impl ControlReply {
    /// Waits for the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Cancelled`] when the link was torn down first.
    pub async fn recv(self) -> Result<ControlEnvelope, LinkError> {
        self.rx.await.map_err(|_| LinkError::Cancelled)
    }
}

/// Guard for one control-envelope subscription; unsubscribes on drop.
pub struct ControlSubscription {
    control: Weak<Mutex<ControlRoutes>>,
    kind: String,
    subscription_id: u64,
}

impl ControlSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for ControlSubscription {
    fn drop(&mut self) {
        let Some(control) = self.control.upgrade() else {
            return;
        };
        let mut control = control.lock().unwrap_or_else(PoisonError::into_inner);
        let emptied = match control.subscribers.get_mut(&self.kind) {
            Some(subs) => {
                subs.retain(|(id, _)| *id != self.subscription_id);
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            control.subscribers.remove(&self.kind);
        }
    }
}

/// Guard for one raw-binary subscription; unsubscribes on drop.
pub struct BinarySubscription {
    binary: Weak<Mutex<Vec<(u64, BinaryCallback)>>>,
    subscription_id: u64,
}

impl BinarySubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for BinarySubscription {
    fn drop(&mut self) {
        if let Some(binary) = self.binary.upgrade() {
            binary
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.subscription_id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
