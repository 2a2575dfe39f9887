//! The signaling channel: pub/sub routing over a relay client.
//!
//! The relay itself is a dumb pipe — it delivers every publish on a channel
//! to every subscriber of that channel, with no acks and no retry. This
//! module layers the routing the peer links need on top of it:
//!
//! - durable subscriptions per `(LinkId, SignalKind)`, removed one at a time
//!   by guard,
//! - one-shot waiters ("resolve on the next offer for this link") that are
//!   independent of each other and cancellable on link teardown,
//! - silent dropping of messages nobody is waiting for.
//!
//! The channel holds two explicit maps keyed by `(LinkId, SignalKind)` — no
//! stringly-typed composite keys — and all state transitions happen on
//! delivery of one inbound message from the relay pump task.

pub mod mock;
pub mod relay_ws;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use padlink_core::{LinkId, SignalKind, SignalMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::SignalError;

/// Client side of the pub/sub relay.
///
/// Publishing is send-and-forget; delivery happens through the receiver
/// handed to [`SignalingChannel::new`].
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Subscribes to the relay channel for `id` so its publishes are
    /// delivered to this client. Joining an already-joined channel is a
    /// no-op.
    async fn join(&self, id: &LinkId) -> Result<(), SignalError>;

    /// Publishes one signaling message to the relay channel for `id`.
    async fn publish(&self, id: &LinkId, message: &SignalMessage) -> Result<(), SignalError>;
}

type RouteKey = (LinkId, SignalKind);
type SubscriberFn = Arc<dyn Fn(&SignalMessage) + Send + Sync>;

#[derive(Default)]
struct Routes {
    /// One-shot waiters, drained (all of them) by the next matching message.
    once: HashMap<RouteKey, Vec<oneshot::Sender<SignalMessage>>>,
    /// Durable subscribers, each removable individually by subscription id.
    subscribers: HashMap<RouteKey, Vec<(u64, SubscriberFn)>>,
}

/// Pub/sub routing for signaling messages, one logical sub-channel per link.
pub struct SignalingChannel {
    relay: Arc<dyn RelayClient>,
    routes: Arc<Mutex<Routes>>,
    next_subscription: AtomicU64,
}

impl SignalingChannel {
    /// Creates the channel and spawns the pump that routes messages arriving
    /// from the relay into waiters and subscribers.
    pub fn new(
        relay: Arc<dyn RelayClient>,
        mut incoming: mpsc::UnboundedReceiver<(LinkId, SignalMessage)>,
    ) -> Arc<Self> {
        let channel = Arc::new(Self {
            relay,
            routes: Arc::new(Mutex::new(Routes::default())),
            next_subscription: AtomicU64::new(0),
        });

        let routes = Arc::clone(&channel.routes);
        tokio::spawn(async move {
            while let Some((id, message)) = incoming.recv().await {
                dispatch(&routes, id, message);
            }
        });

        channel
    }

    /// Subscribes this client to the relay channel for `id`.
    pub async fn open_link(&self, id: &LinkId) -> Result<(), SignalError> {
        self.relay.join(id).await
    }

    /// Publishes a message to the relay channel for `id`. Send-and-forget:
    /// the relay gives no delivery acknowledgement.
    pub async fn publish(&self, id: &LinkId, message: &SignalMessage) -> Result<(), SignalError> {
        self.relay.publish(id, message).await
    }

    /// Registers a durable listener for `(id, kind)` messages.
    ///
    /// The returned guard unsubscribes exactly this registration when dropped
    /// (or via [`SignalSubscription::unsubscribe`]); other listeners on the
    /// same key are unaffected.
    pub fn subscribe(
        &self,
        id: &LinkId,
        kind: SignalKind,
        callback: impl Fn(&SignalMessage) + Send + Sync + 'static,
    ) -> SignalSubscription {
        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let key = (id.clone(), kind);
        self.lock_routes()
            .subscribers
            .entry(key.clone())
            .or_default()
            .push((subscription_id, Arc::new(callback)));
        SignalSubscription {
            routes: Arc::downgrade(&self.routes),
            key,
            subscription_id,
        }
    }

    /// Returns a future for the next `(id, kind)` message.
    ///
    /// Repeated calls create independent waiters; every waiter registered at
    /// delivery time resolves with the same message. A waiter whose link is
    /// torn down resolves with [`SignalError::Cancelled`] instead of leaking.
    pub fn once(&self, id: &LinkId, kind: SignalKind) -> OnceSignal {
        let (tx, rx) = oneshot::channel();
        self.lock_routes()
            .once
            .entry((id.clone(), kind))
            .or_default()
            .push(tx);
        OnceSignal { rx }
    }

    /// Cancels every pending one-shot waiter for `id`; each resolves with
    /// [`SignalError::Cancelled`]. Durable subscriptions are owned by their
    /// guards and are not affected.
    pub fn cancel_link(&self, id: &LinkId) {
        self.lock_routes().once.retain(|(link, _), _| link != id);
    }

    // A subscriber callback that panics poisons the routes mutex; keep the
    // channel usable rather than wedging every link on the poison flag.
    fn lock_routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Routes one inbound relay message into waiters and subscribers.
///
/// Callbacks are invoked outside the routes lock so a subscriber may register
/// or drop subscriptions from inside its callback.
fn dispatch(routes: &Mutex<Routes>, id: LinkId, message: SignalMessage) {
    let key = (id, message.kind());
    let (waiters, callbacks) = {
        let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
        let waiters = routes.once.remove(&key).unwrap_or_default();
        let callbacks: Vec<SubscriberFn> = routes
            .subscribers
            .get(&key)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        (waiters, callbacks)
    };

    if waiters.is_empty() && callbacks.is_empty() {
        trace!(link = %key.0, kind = %key.1, "dropping unmatched signaling message");
        return;
    }
    for waiter in waiters {
        let _ = waiter.send(message.clone());
    }
    for callback in callbacks {
        callback(&message);
    }
}

/// Guard for one durable subscription; unsubscribes on drop.
pub struct SignalSubscription {
    routes: Weak<Mutex<Routes>>,
    key: RouteKey,
    subscription_id: u64,
}

impl SignalSubscription {
    /// Removes this registration now instead of at scope end.
    pub fn unsubscribe(self) {}
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        let Some(routes) = self.routes.upgrade() else {
            return;
        };
        let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
        let emptied = match routes.subscribers.get_mut(&self.key) {
            Some(subs) => {
                subs.retain(|(id, _)| *id != self.subscription_id);
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            routes.subscribers.remove(&self.key);
        }
    }
}

/// A single-resolution future for the next message of one kind.
pub struct OnceSignal {
    rx: oneshot::Receiver<SignalMessage>,
}

impl OnceSignal {
    /// Waits for the message.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Cancelled`] when the link was torn down before
    /// a matching message arrived.
    pub async fn recv(self) -> Result<SignalMessage, SignalError> {
        self.rx.await.map_err(|_| SignalError::Cancelled)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
