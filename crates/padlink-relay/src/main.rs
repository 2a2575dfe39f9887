//! padlink signaling relay — entry point.
//!
//! Hosts and controllers cannot talk to each other before their peer link
//! exists; this process is the out-of-band pub/sub pipe they negotiate
//! through. It routes JSON blobs between subscribers of named channels and
//! knows nothing about offers, answers, or candidates.
//!
//! # Usage
//!
//! ```text
//! padlink-relay [OPTIONS]
//!
//! Options:
//!   --port <PORT>   WebSocket listener port [default: 9400]
//!   --bind <ADDR>   Bind address [default: 0.0.0.0]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable              | Default   | Description             |
//! |-----------------------|-----------|-------------------------|
//! | `PADLINK_RELAY_PORT`  | `9400`    | WebSocket listener port |
//! | `PADLINK_RELAY_BIND`  | `0.0.0.0` | Bind address            |
//!
//! CLI arguments take precedence when both are present. The log level comes
//! from `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use padlink_relay::{run_server, RelayConfig};

/// padlink signaling relay.
///
/// A WebSocket pub/sub service used by hosts and controllers to exchange
/// session descriptions and ICE candidates while their direct peer link is
/// negotiated.
#[derive(Debug, Parser)]
#[command(
    name = "padlink-relay",
    about = "WebSocket pub/sub signaling relay for padlink",
    version
)]
struct Cli {
    /// TCP port for the WebSocket listener.
    #[arg(long, default_value_t = 9400, env = "PADLINK_RELAY_PORT")]
    port: u16,

    /// IP address to bind to. Use `0.0.0.0` to accept connections from any
    /// interface, or `127.0.0.1` for local-only operation.
    #[arg(long, default_value = "0.0.0.0", env = "PADLINK_RELAY_BIND")]
    bind: String,
}

impl Cli {
    /// Converts the parsed arguments into a [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error when `--bind` is not a valid IP address.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;
        Ok(RelayConfig { bind_addr })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config()?;
    info!("padlink relay starting on {}", config.bind_addr);

    // Ctrl-C clears the flag; the accept loop checks it every 200 ms.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C — shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("padlink relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
