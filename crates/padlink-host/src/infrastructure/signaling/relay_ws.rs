//! WebSocket client for the padlink signaling relay.
//!
//! One WebSocket connection carries every link's signaling traffic. The
//! relay channel for a link is named `/<link-id>`, mirroring the path-style
//! topics of the hosted relay service. Two background tasks own the socket
//! halves:
//!
//! - the writer drains an unbounded queue of outbound frames, so `publish`
//!   never blocks on socket backpressure (send-and-forget semantics),
//! - the reader decodes `RelayDelivery` frames and forwards them to the
//!   `SignalingChannel` pump. Malformed frames are logged and skipped; one
//!   bad message must not end the session.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use padlink_core::signaling::{RelayDelivery, RelayRequest};
use padlink_core::{LinkId, SignalMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::RelayClient;
use crate::error::SignalError;

/// WebSocket-backed [`RelayClient`].
pub struct WsRelayClient {
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl WsRelayClient {
    /// Connects to the relay and returns the client together with the
    /// delivery receiver to hand to `SignalingChannel::new`.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Relay`] when the WebSocket handshake fails.
    pub async fn connect(
        url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<(LinkId, SignalMessage)>), SignalError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalError::Relay(format!("connect to {url} failed: {e}")))?;
        info!("connected to signaling relay at {url}");

        let (mut sink, mut stream) = ws_stream.split();

        // Writer task: drain the outbound queue into the socket.
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!("relay write failed, dropping connection: {e}");
                    break;
                }
            }
        });

        // Reader task: decode deliveries and forward them to the pump.
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("relay read error, closing: {e}");
                        break;
                    }
                };
                match frame {
                    WsMessage::Text(text) => {
                        let delivery: RelayDelivery = match serde_json::from_str(&text) {
                            Ok(delivery) => delivery,
                            Err(e) => {
                                warn!("invalid relay delivery frame: {e}");
                                continue;
                            }
                        };
                        let id = link_id_of(&delivery.channel);
                        match serde_json::from_value::<SignalMessage>(delivery.data) {
                            Ok(message) => {
                                if incoming_tx.send((id, message)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(link = %id, "unparseable signaling message: {e}");
                            }
                        }
                    }
                    WsMessage::Close(_) => {
                        debug!("relay closed the connection");
                        break;
                    }
                    // Protocol-level ping/pong is handled by tungstenite.
                    _ => {}
                }
            }
        });

        Ok((Arc::new(Self { outbound }), incoming_rx))
    }

    fn send(&self, request: &RelayRequest) -> Result<(), SignalError> {
        let text = serde_json::to_string(request)?;
        self.outbound
            .send(WsMessage::Text(text))
            .map_err(|_| SignalError::Relay("relay connection is closed".to_string()))
    }
}

#[async_trait]
impl RelayClient for WsRelayClient {
    async fn join(&self, id: &LinkId) -> Result<(), SignalError> {
        self.send(&RelayRequest::Subscribe {
            channel: channel_of(id),
        })
    }

    async fn publish(&self, id: &LinkId, message: &SignalMessage) -> Result<(), SignalError> {
        self.send(&RelayRequest::Publish {
            channel: channel_of(id),
            data: serde_json::to_value(message)?,
        })
    }
}

/// Relay channel name for a link: `/<id>`.
fn channel_of(id: &LinkId) -> String {
    format!("/{id}")
}

/// Inverse of [`channel_of`]; tolerates a missing slash.
fn link_id_of(channel: &str) -> LinkId {
    LinkId::new(channel.strip_prefix('/').unwrap_or(channel))
}
