//! In-memory relay for unit and integration tests.
//!
//! Behaves like the real pub/sub relay seen from one client: publishes on a
//! joined channel are delivered back to this client (publisher included),
//! and tests can play the remote peer by injecting messages or inspecting
//! the publish log.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use padlink_core::{LinkId, SignalMessage};
use tokio::sync::mpsc;

use super::RelayClient;
use crate::error::SignalError;

struct LoopbackState {
    joined: HashSet<LinkId>,
    tap: mpsc::UnboundedSender<(LinkId, SignalMessage)>,
    published: Vec<(LinkId, SignalMessage)>,
}

/// A single-client relay living entirely in process.
pub struct LoopbackRelay {
    state: Mutex<LoopbackState>,
}

impl LoopbackRelay {
    /// Creates the relay plus the delivery receiver to hand to
    /// `SignalingChannel::new`.
    pub fn new() -> (
        std::sync::Arc<Self>,
        mpsc::UnboundedReceiver<(LinkId, SignalMessage)>,
    ) {
        let (tap, rx) = mpsc::unbounded_channel();
        let relay = std::sync::Arc::new(Self {
            state: Mutex::new(LoopbackState {
                joined: HashSet::new(),
                tap,
                published: Vec::new(),
            }),
        });
        (relay, rx)
    }

    /// Plays the remote peer: delivers `message` on the channel for `id`.
    /// Dropped when the client never joined that channel, exactly as the
    /// real relay would not route to a non-subscriber.
    pub fn inject(&self, id: &LinkId, message: SignalMessage) {
        let state = self.lock();
        if state.joined.contains(id) {
            let _ = state.tap.send((id.clone(), message));
        }
    }

    /// Whether the client has joined the channel for `id`.
    pub fn is_joined(&self, id: &LinkId) -> bool {
        self.lock().joined.contains(id)
    }

    /// Snapshot of everything the client has published, in order.
    pub fn published(&self) -> Vec<(LinkId, SignalMessage)> {
        self.lock().published.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RelayClient for LoopbackRelay {
    async fn join(&self, id: &LinkId) -> Result<(), SignalError> {
        self.lock().joined.insert(id.clone());
        Ok(())
    }

    async fn publish(&self, id: &LinkId, message: &SignalMessage) -> Result<(), SignalError> {
        let mut state = self.lock();
        state.published.push((id.clone(), message.clone()));
        // The relay fans a publish out to every subscriber of the channel —
        // including the publisher itself when it is subscribed.
        if state.joined.contains(id) {
            let _ = state.tap.send((id.clone(), message.clone()));
        }
        Ok(())
    }
}
