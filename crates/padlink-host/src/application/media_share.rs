//! Host side of the media-share flow.
//!
//! A controller asks the host to share what it is currently playing:
//!
//! ```text
//! controller ── share-request ──────────► host
//! controller ◄─ share-request-reply ──── host   ok / {ok:false, reason}
//! controller ◄─ chunk frames (tag 6) ─── host   while capture is active
//! controller ── share-request-stop ────► host
//! controller ◄─ share-request-stop-reply host
//! ```
//!
//! A request while capture is already active, or while no fragment is
//! buffered, gets a structured negative reply over the control plane — the
//! channel itself stays healthy. Fragments come from a [`FragmentSource`];
//! this service carries no media logic of its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use padlink_core::protocol::control::{
    ShareReply, ShareStopReply, SHARE_REQUEST, SHARE_REQUEST_REPLY, SHARE_REQUEST_STOP,
    SHARE_REQUEST_STOP_REPLY,
};
use padlink_core::ControlEnvelope;
use tracing::{debug, info, warn};

use crate::application::device::Device;
use crate::error::LinkError;

/// How often the streaming loop polls the source for newly captured
/// fragments while waiting for the stop request.
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One captured media fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Playback duration in seconds.
    pub duration: f64,
    /// Raw fragment bytes.
    pub data: Vec<u8>,
}

/// Supplies fragments from the host's player.
pub trait FragmentSource: Send + Sync {
    /// The fragment currently buffered by the player, if any.
    fn current(&self) -> Option<Arc<Fragment>>;

    /// Seconds of playback elapsed inside the current fragment.
    fn elapsed(&self) -> f64;

    /// Capture began or ended; while active the source queues every
    /// fragment the player moves through.
    fn set_capturing(&self, active: bool);

    /// The `index`-th captured fragment (0 = the fragment current at capture
    /// start), once the player has collected it.
    fn captured(&self, index: u32) -> Option<Arc<Fragment>>;
}

/// Serves share requests on one device.
pub struct MediaShareHost {
    device: Arc<Device>,
    source: Arc<dyn FragmentSource>,
    capturing: AtomicBool,
}

impl MediaShareHost {
    pub fn new(device: Arc<Device>, source: Arc<dyn FragmentSource>) -> Arc<Self> {
        Arc::new(Self {
            device,
            source,
            capturing: AtomicBool::new(false),
        })
    }

    /// Serves share requests until the link is torn down.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.serve_once().await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => {
                    debug!("media share stopped: link torn down");
                    break;
                }
                Err(e) => {
                    warn!("media share session failed: {e}");
                    break;
                }
            }
        }
    }

    /// Waits for one `share-request` and serves it to completion.
    ///
    /// # Errors
    ///
    /// Returns the underlying link error when the channel fails mid-stream
    /// or the link is torn down while waiting.
    pub async fn serve_once(&self) -> Result<(), LinkError> {
        let _request = self.device.once(SHARE_REQUEST).recv().await?;
        debug!("share request received");

        if self.capturing.load(Ordering::Acquire) {
            return self.refuse("fragments are not ready or busy").await;
        }
        let Some(first) = self.source.current() else {
            return self.refuse("fragments are not ready or busy").await;
        };

        // Register the stop waiter before confirming so a stop racing the
        // reply cannot be missed.
        let stop_wait = self.device.once(SHARE_REQUEST_STOP);

        let reply = ShareReply {
            ok: true,
            reason: None,
            offset: self.source.elapsed(),
            length: first.data.len() as u64,
            duration: first.duration,
        };
        self.capturing.store(true, Ordering::Release);
        self.source.set_capturing(true);
        self.device
            .send_control(&ControlEnvelope::from_payload(SHARE_REQUEST_REPLY, &reply)?)
            .await?;
        info!(
            "share started: {} bytes, {:.2}s fragment",
            reply.length, reply.duration
        );

        // Stream captured fragments until the controller asks to stop. Errors
        // break the loop instead of returning so capture state is always
        // cleared before this function exits.
        let mut stop_wait = std::pin::pin!(stop_wait.recv());
        let mut transferred: u32 = 0;
        let mut last = Arc::clone(&first);
        let stop_result = loop {
            tokio::select! {
                stopped = &mut stop_wait => break stopped,
                _ = tokio::time::sleep(CAPTURE_POLL_INTERVAL) => {
                    if let Some(fragment) = self.source.captured(transferred) {
                        if let Err(e) = self
                            .device
                            .send_media(transferred as u16, fragment.duration as f32, &fragment.data)
                            .await
                        {
                            break Err(e);
                        }
                        last = fragment;
                        transferred += 1;
                    }
                }
            }
        };

        self.capturing.store(false, Ordering::Release);
        self.source.set_capturing(false);
        stop_result?;

        let stop_reply = ShareStopReply {
            ok: true,
            reason: None,
            keep: self.source.elapsed(),
            keep_id: transferred.saturating_sub(1),
            keep_full_length: last.data.len() as u64,
            keep_full_duration: last.duration,
        };
        self.device
            .send_control(&ControlEnvelope::from_payload(
                SHARE_REQUEST_STOP_REPLY,
                &stop_reply,
            )?)
            .await?;
        info!("share stopped after {transferred} fragment(s)");
        Ok(())
    }

    async fn refuse(&self, reason: &str) -> Result<(), LinkError> {
        debug!("refusing share request: {reason}");
        self.device
            .send_control(&ControlEnvelope::from_payload(
                SHARE_REQUEST_REPLY,
                &ShareReply::refused(reason),
            )?)
            .await
    }
}
