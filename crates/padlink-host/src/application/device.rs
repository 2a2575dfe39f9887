//! The device facade: one linked controller peer.
//!
//! A `Device` wraps a [`PeerLink`] and stays valid across reconnects — the
//! link replaces its underlying channel, the device object and its
//! subscriptions do not move. Inbound binary frames are decoded once and
//! dispatched by an explicit match on the typed event, with one callback
//! list per event kind; a frame with an unknown tag is logged and dropped
//! without disturbing the frames after it.
//!
//! The outbound side offers the raw `send_text`/`send_buffer` primitives and
//! [`Device::send_media`], which streams one large payload as chunk frames
//! under buffered-amount flow control.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use padlink_core::protocol::chunk::encode_chunk;
use padlink_core::{
    chunk_ranges, decode_frame, ChunkFrame, ConnectionState, ControlEnvelope, EventTag, InputEvent,
    LinkId, ProtocolError, WireFrame,
};
use tokio::sync::watch;
use tracing::warn;

use crate::error::LinkError;
use crate::infrastructure::peer::link::{
    BinarySubscription, ControlReply, ControlSubscription, PeerLink,
};

/// Reserved headroom below the channel message limit for the chunk header.
pub const CHUNK_HEADER_RESERVE: usize = 1024;

/// Suspend sending once this many chunk-sized messages are buffered. A large
/// multiple so the sender does not thrash on the drain callback while memory
/// growth stays bounded.
const DRAIN_BACKLOG_CHUNKS: usize = 24;

type InputCallback = Arc<dyn Fn(&InputEvent) + Send + Sync>;
type ChunkCallback = Arc<dyn Fn(&ChunkFrame) + Send + Sync>;

#[derive(Default)]
struct EventHandlers {
    input: Mutex<HashMap<EventTag, Vec<(u64, InputCallback)>>>,
    chunks: Mutex<Vec<(u64, ChunkCallback)>>,
    next_id: AtomicU64,
}

impl EventHandlers {
    // Callbacks run outside the lock so one may register or drop
    // subscriptions from inside its body.
    fn dispatch_input(&self, event: &InputEvent) {
        let callbacks: Vec<InputCallback> = {
            let handlers = self.input.lock().unwrap_or_else(PoisonError::into_inner);
            handlers
                .get(&event.tag())
                .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    fn dispatch_chunk(&self, chunk: &ChunkFrame) {
        let callbacks: Vec<ChunkCallback> = {
            let handlers = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(chunk);
        }
    }
}

/// One linked remote controller.
pub struct Device {
    link: Arc<PeerLink>,
    handlers: Arc<EventHandlers>,
    /// Keeps the frame decoder registered on the link for the device
    /// lifetime.
    _frame_sub: BinarySubscription,
}

impl Device {
    /// Wraps an established link in the device facade.
    pub fn new(link: Arc<PeerLink>) -> Self {
        let handlers = Arc::new(EventHandlers::default());
        let frame_sub = {
            let handlers = Arc::clone(&handlers);
            let id = link.id().clone();
            link.subscribe_binary(move |bytes| match decode_frame(bytes) {
                Ok(WireFrame::Input(event)) => handlers.dispatch_input(&event),
                Ok(WireFrame::MediaChunk(chunk)) => handlers.dispatch_chunk(&chunk),
                Err(ProtocolError::UnknownTag(tag)) => {
                    warn!(link = %id, "unknown event tag {tag}, frame dropped");
                }
                Err(e) => {
                    warn!(link = %id, "malformed frame dropped: {e}");
                }
            })
        };
        Self {
            link,
            handlers,
            _frame_sub: frame_sub,
        }
    }

    /// The stable link identifier.
    pub fn id(&self) -> &LinkId {
        self.link.id()
    }

    /// Current connection state of the underlying link.
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// A watcher over connection-state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.watch_state()
    }

    // ── Typed event subscriptions ─────────────────────────────────────────────

    /// Continuous touch position updates, both axes as 0–1 ratios.
    pub fn on_touch_move(
        &self,
        callback: impl Fn(f32, f32) + Send + Sync + 'static,
    ) -> EventGuard {
        self.register_input(
            EventTag::TouchMove,
            Arc::new(move |event| {
                if let InputEvent::TouchMove { x_ratio, y_ratio } = *event {
                    callback(x_ratio, y_ratio);
                }
            }),
        )
    }

    /// Discrete taps, both axes as 0–1 ratios.
    pub fn on_touch_tap(&self, callback: impl Fn(f32, f32) + Send + Sync + 'static) -> EventGuard {
        self.register_input(
            EventTag::TouchTap,
            Arc::new(move |event| {
                if let InputEvent::TouchTap { x_ratio, y_ratio } = *event {
                    callback(x_ratio, y_ratio);
                }
            }),
        )
    }

    /// Joystick deflection: direction in degrees, distance as a 0–1 ratio.
    pub fn on_joystick_change(
        &self,
        callback: impl Fn(f32, f32) + Send + Sync + 'static,
    ) -> EventGuard {
        self.register_input(
            EventTag::JoystickChange,
            Arc::new(move |event| {
                if let InputEvent::JoystickChange { degree, distance } = *event {
                    callback(degree, distance);
                }
            }),
        )
    }

    /// Pad button taps: button index and gesture code.
    pub fn on_pad_button_tap(
        &self,
        callback: impl Fn(u16, u16) + Send + Sync + 'static,
    ) -> EventGuard {
        self.register_input(
            EventTag::PadButtonTap,
            Arc::new(move |event| {
                if let InputEvent::PadButtonTap { index, gesture } = *event {
                    callback(index, gesture);
                }
            }),
        )
    }

    /// Gyroscope samples: azimuth, pitch, and roll in degrees.
    pub fn on_gyroscope_change(
        &self,
        callback: impl Fn(f32, f32, f32) + Send + Sync + 'static,
    ) -> EventGuard {
        self.register_input(
            EventTag::GyroscopeChange,
            Arc::new(move |event| {
                if let InputEvent::GyroscopeChange {
                    azimuth,
                    pitch,
                    roll,
                } = *event
                {
                    callback(azimuth, pitch, roll);
                }
            }),
        )
    }

    /// Inbound bulk-transfer chunk frames (tag 6), delivered undecoded so the
    /// consumer can feed its own `ChunkAssembler`.
    pub fn on_media_chunk(
        &self,
        callback: impl Fn(&ChunkFrame) + Send + Sync + 'static,
    ) -> EventGuard {
        let id = self.handlers.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        EventGuard {
            handlers: Arc::downgrade(&self.handlers),
            slot: GuardSlot::Chunk,
            id,
        }
    }

    fn register_input(&self, tag: EventTag, callback: InputCallback) -> EventGuard {
        let id = self.handlers.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tag)
            .or_default()
            .push((id, callback));
        EventGuard {
            handlers: Arc::downgrade(&self.handlers),
            slot: GuardSlot::Input(tag),
            id,
        }
    }

    // ── Control plane ─────────────────────────────────────────────────────────

    /// A future for the next control envelope of `kind` from this device.
    pub fn once(&self, kind: &str) -> ControlReply {
        self.link.once_control(kind)
    }

    /// A durable listener for control envelopes of `kind`.
    pub fn subscribe(
        &self,
        kind: &str,
        callback: impl Fn(&ControlEnvelope) + Send + Sync + 'static,
    ) -> ControlSubscription {
        self.link.subscribe_control(kind, callback)
    }

    /// Sends one control envelope over the text path.
    pub async fn send_control(&self, envelope: &ControlEnvelope) -> Result<(), LinkError> {
        let text = serde_json::to_string(envelope)?;
        self.link.send_text(&text).await
    }

    // ── Send primitives ───────────────────────────────────────────────────────

    /// Sends raw text over the channel.
    pub async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        self.link.send_text(text).await
    }

    /// Sends one raw binary frame over the channel.
    pub async fn send_buffer(&self, bytes: &[u8]) -> Result<(), LinkError> {
        self.link.send_binary(bytes).await
    }

    /// Largest message the channel accepts; 0 while disconnected.
    pub async fn max_message_size(&self) -> usize {
        self.link.max_message_size().await
    }

    /// Streams one payload as sequential chunk frames under flow control.
    ///
    /// Ranges cover `[0, data.len())` contiguously, each at most the channel
    /// message budget (message size minus the header reserve, rounded down
    /// to a 4-byte multiple). Before each send, the sender suspends while
    /// the channel reports more than 24 chunk budgets of buffered bytes,
    /// resuming on the drain notification; channels without drain support
    /// are sent to unthrottled.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] without a channel and
    /// [`LinkError::Transport`] when the budget is too small or a send fails.
    pub async fn send_media(
        &self,
        chunk_id: u16,
        duration: f32,
        data: &[u8],
    ) -> Result<(), LinkError> {
        let channel = self.link.open_channel().await?;
        let Some(budget) = chunk_budget(channel.max_message_size()) else {
            return Err(LinkError::Transport(
                "channel message size leaves no room for chunk frames".to_string(),
            ));
        };
        let drain = channel.drain_signal();
        let high_water = budget * DRAIN_BACKLOG_CHUNKS;

        for (start, end) in chunk_ranges(data.len() as u32, budget as u32) {
            if let Some(drain) = &drain {
                loop {
                    let drained = drain.notified();
                    if channel.buffered_amount().await <= high_water {
                        break;
                    }
                    drained.await;
                }
            }
            let frame = ChunkFrame::new(
                chunk_id,
                start,
                end,
                data.len() as u32,
                duration,
                data[start as usize..end as usize].to_vec(),
            )?;
            channel.send_binary(&encode_chunk(&frame)).await?;
        }
        Ok(())
    }

    /// Tears the link down permanently; no reconnection follows.
    pub async fn disconnect(&self) {
        self.link.disconnect().await;
    }

    /// Re-establishes a terminally closed link under the same identity and
    /// device object. Transport drops reconnect automatically; this covers
    /// deliberate disconnects and exhausted retry policies.
    ///
    /// # Errors
    ///
    /// Fails while the link is still active, and propagates negotiation
    /// errors like the initial connect.
    pub async fn reconnect(&self) -> Result<(), LinkError> {
        Arc::clone(&self.link).reconnect().await
    }
}

/// Usable chunk payload budget for a channel message limit, 4-byte aligned.
fn chunk_budget(max_message_size: usize) -> Option<usize> {
    let budget = max_message_size.saturating_sub(CHUNK_HEADER_RESERVE) & !3;
    (budget > 0).then_some(budget)
}

enum GuardSlot {
    Input(EventTag),
    Chunk,
}

/// Guard for one typed event subscription; unregisters exactly that callback
/// on drop.
pub struct EventGuard {
    handlers: Weak<EventHandlers>,
    slot: GuardSlot,
    id: u64,
}

impl EventGuard {
    pub fn unsubscribe(self) {}
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        let Some(handlers) = self.handlers.upgrade() else {
            return;
        };
        match self.slot {
            GuardSlot::Input(tag) => {
                let mut input = handlers.input.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(callbacks) = input.get_mut(&tag) {
                    callbacks.retain(|(id, _)| *id != self.id);
                }
            }
            GuardSlot::Chunk => {
                handlers
                    .chunks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(id, _)| *id != self.id);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
