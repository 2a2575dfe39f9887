//! WebRTC implementation of the peer transport traits.
//!
//! One [`WebRtcConnector`] produces one `RTCPeerConnection` per negotiation
//! attempt. The controller peer creates the offer and the data channel; this
//! side answers, adopts the announced channel when it opens, and surfaces
//! everything the link machinery needs as [`EndpointEvent`]s:
//!
//! - `on_ice_candidate` → [`EndpointEvent::LocalCandidate`] for the relay,
//! - `on_data_channel` + `on_open` → [`EndpointEvent::ChannelOpen`],
//! - connection failure/close → [`EndpointEvent::Closed`].
//!
//! The channel's `bufferedAmountLow` callback feeds the drain signal used by
//! the chunk sender's flow control.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use padlink_core::IceCandidate;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{ChannelMessage, DataChannel, EndpointEvent, PeerConnector, PeerEndpoint};
use crate::error::LinkError;

/// SCTP implementations commonly cap messages at 256 KiB; report the safe
/// default instead of probing transport internals.
pub const SCTP_DEFAULT_MAX_MESSAGE_SIZE: usize = 262_144;

/// Buffered-amount level below which the drain notification fires.
const BUFFERED_AMOUNT_LOW_THRESHOLD: usize = 262_144;

type InboundSlot = Arc<Mutex<Option<mpsc::Sender<ChannelMessage>>>>;

/// Creates WebRTC peer connections configured with the host's ICE servers.
pub struct WebRtcConnector {
    ice_server_urls: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_server_urls: Vec<String>) -> Self {
        Self { ice_server_urls }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_server_urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_server_urls.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open_endpoint(
        &self,
    ) -> Result<(Arc<dyn PeerEndpoint>, mpsc::Receiver<EndpointEvent>), LinkError> {
        // A media engine is required even for data-only connections.
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| LinkError::Transport(format!("codec registration failed: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| LinkError::Transport(format!("interceptor registration failed: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| LinkError::Transport(format!("peer connection failed: {e}")))?,
        );

        let (event_tx, event_rx) = mpsc::channel(64);

        // Locally-gathered candidates go to the relay via the link.
        {
            let event_tx = event_tx.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let event_tx = event_tx.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = event_tx
                                .send(EndpointEvent::LocalCandidate(IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                }))
                                .await;
                        }
                        Err(e) => warn!("failed to serialize local candidate: {e}"),
                    }
                })
            }));
        }

        // Transport-level failure or close ends the session.
        {
            let event_tx = event_tx.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let event_tx = event_tx.clone();
                Box::pin(async move {
                    debug!("peer connection state: {state}");
                    if matches!(
                        state,
                        RTCPeerConnectionState::Disconnected
                            | RTCPeerConnectionState::Failed
                            | RTCPeerConnectionState::Closed
                    ) {
                        let _ = event_tx.send(EndpointEvent::Closed).await;
                    }
                })
            }));
        }

        // The controller creates the channel; adopt it when announced.
        {
            let event_tx = event_tx.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let event_tx = event_tx.clone();
                Box::pin(async move {
                    debug!("data channel announced: {}", dc.label());
                    adopt_channel(dc, event_tx).await;
                })
            }));
        }

        Ok((Arc::new(WebRtcEndpoint { pc }), event_rx))
    }
}

/// Wires one announced `RTCDataChannel` into the link's event stream.
async fn adopt_channel(dc: Arc<RTCDataChannel>, event_tx: mpsc::Sender<EndpointEvent>) {
    let (inbound_tx, messages) = mpsc::channel(256);
    // The sender lives in a shared slot so the close handler can end the
    // inbound stream; the message handler only borrows it per message.
    let inbound: InboundSlot = Arc::new(Mutex::new(Some(inbound_tx)));

    {
        let inbound = Arc::clone(&inbound);
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            let inbound = Arc::clone(&inbound);
            Box::pin(async move {
                let payload = if message.is_string {
                    ChannelMessage::Text(String::from_utf8_lossy(&message.data).into_owned())
                } else {
                    ChannelMessage::Binary(message.data.to_vec())
                };
                let tx = inbound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(tx) = tx {
                    let _ = tx.send(payload).await;
                }
            })
        }));
    }

    {
        let inbound = Arc::clone(&inbound);
        dc.on_close(Box::new(move || {
            let inbound = Arc::clone(&inbound);
            Box::pin(async move {
                inbound.lock().unwrap_or_else(PoisonError::into_inner).take();
            })
        }));
    }

    // bufferedAmountLow drives the chunk sender's flow control.
    let drain = Arc::new(Notify::new());
    dc.set_buffered_amount_low_threshold(BUFFERED_AMOUNT_LOW_THRESHOLD)
        .await;
    {
        let drain = Arc::clone(&drain);
        dc.on_buffered_amount_low(Box::new(move || {
            let drain = Arc::clone(&drain);
            Box::pin(async move {
                drain.notify_one();
            })
        }))
        .await;
    }

    // Report ready exactly once, when the channel actually opens.
    let slot = Arc::new(Mutex::new(Some(messages)));
    let channel_dc = Arc::clone(&dc);
    dc.on_open(Box::new(move || {
        let event_tx = event_tx.clone();
        let slot = Arc::clone(&slot);
        let drain = Arc::clone(&drain);
        let channel_dc = Arc::clone(&channel_dc);
        Box::pin(async move {
            let Some(messages) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() else {
                return;
            };
            debug!("data channel open: {}", channel_dc.label());
            let channel: Arc<dyn DataChannel> = Arc::new(WebRtcChannel {
                dc: channel_dc,
                drain,
            });
            let _ = event_tx
                .send(EndpointEvent::ChannelOpen { channel, messages })
                .await;
        })
    }));
}

/// One `RTCPeerConnection` in the responder role.
pub struct WebRtcEndpoint {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerEndpoint for WebRtcEndpoint {
    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), LinkError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| LinkError::Transport(format!("invalid offer SDP: {e}")))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| LinkError::Transport(format!("set remote description failed: {e}")))
    }

    async fn create_answer(&self) -> Result<String, LinkError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| LinkError::Transport(format!("create answer failed: {e}")))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| LinkError::Transport(format!("set local description failed: {e}")))?;
        Ok(answer.sdp)
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), LinkError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| LinkError::Transport(format!("add ICE candidate failed: {e}")))
    }

    async fn close(&self) {
        // close() must run: dropping the connection without it leaks the
        // underlying SCTP sockets.
        if let Err(e) = self.pc.close().await {
            debug!("peer connection close error: {e}");
        }
    }
}

/// The negotiated `RTCDataChannel` behind the [`DataChannel`] trait.
pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    drain: Arc<Notify>,
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        self.dc
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| LinkError::Transport(format!("text send failed: {e}")))
    }

    async fn send_binary(&self, bytes: &[u8]) -> Result<(), LinkError> {
        self.dc
            .send(&Bytes::copy_from_slice(bytes))
            .await
            .map(|_| ())
            .map_err(|e| LinkError::Transport(format!("binary send failed: {e}")))
    }

    fn max_message_size(&self) -> usize {
        SCTP_DEFAULT_MAX_MESSAGE_SIZE
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    fn drain_signal(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.drain))
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!("data channel close error: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
