//! WebSocket server: accept loop and per-session frame handling.
//!
//! Each accepted connection is upgraded to a WebSocket and handed to its own
//! Tokio task, so one slow client never blocks the others. A session reads
//! relay requests (subscribe/unsubscribe/publish) and writes deliveries from
//! an unbounded per-connection queue; the hub owns the routing.
//!
//! The accept loop polls a shared shutdown flag every 200 ms so Ctrl-C stops
//! the relay even when no client is connecting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use padlink_core::signaling::RelayRequest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::hub::Hub;

/// Relay service configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,
}

/// Binds the listener and runs the accept loop until `running` is cleared.
///
/// # Errors
///
/// Returns an error when the listener cannot be bound (port in use, missing
/// privileges).
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;
    info!("signaling relay listening on {}", config.bind_addr);
    serve(listener, running).await
}

/// Runs the accept loop on an already-bound listener. Split out so tests can
/// bind an ephemeral port themselves.
pub async fn serve(listener: TcpListener, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let hub = Arc::new(Hub::new());
    let next_conn_id = AtomicU64::new(1);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout keeps the loop responsive to the shutdown flag.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                info!("connection {conn_id} from {peer_addr}");
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, conn_id, hub).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept failure; keep serving.
                warn!("accept error: {e}");
            }
            Err(_) => {
                // Timeout with no connection; re-check the flag.
            }
        }
    }

    Ok(())
}

/// Wraps one session and guarantees hub cleanup afterwards.
async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, conn_id: u64, hub: Arc<Hub>) {
    match run_session(stream, peer_addr, conn_id, &hub).await {
        Ok(()) => info!("connection {conn_id} ({peer_addr}) closed"),
        Err(e) => warn!("connection {conn_id} ({peer_addr}) failed: {e:#}"),
    }
    hub.drop_connection(conn_id);
}

/// Runs the lifecycle of one relay client connection.
async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    conn_id: u64,
    hub: &Hub,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (mut sink, mut stream) = ws_stream.split();

    // Deliveries for this connection queue here; the select loop below is
    // the only writer on the socket.
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            delivery = outbound_rx.recv() => match delivery {
                Some(text) => sink
                    .send(WsMessage::Text(text))
                    .await
                    .context("delivery write failed")?,
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_request(conn_id, &text, hub, &outbound);
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("connection {conn_id}: closed by peer");
                    break;
                }
                // Protocol-level ping/pong is handled by tungstenite; binary
                // frames have no meaning on the relay.
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("connection {conn_id}: unexpected binary frame (ignored)");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("connection {conn_id}: read error: {e}");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Applies one decoded relay request.
fn handle_request(
    conn_id: u64,
    text: &str,
    hub: &Hub,
    outbound: &mpsc::UnboundedSender<String>,
) {
    match serde_json::from_str::<RelayRequest>(text) {
        Ok(RelayRequest::Subscribe { channel }) => {
            hub.subscribe(conn_id, &channel, outbound.clone());
        }
        Ok(RelayRequest::Unsubscribe { channel }) => {
            hub.unsubscribe(conn_id, &channel);
        }
        Ok(RelayRequest::Publish { channel, data }) => {
            let delivered = hub.publish(&channel, &data);
            debug!("connection {conn_id}: publish on {channel} reached {delivered} subscriber(s)");
        }
        Err(e) => {
            // One bad frame is not worth the whole session.
            warn!("connection {conn_id}: invalid relay request: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
