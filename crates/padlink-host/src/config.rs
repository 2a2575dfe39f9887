//! TOML host configuration.
//!
//! ```toml
//! transport = "webrtc"
//! relay_url = "ws://127.0.0.1:9400"
//! ice_servers = ["stun:stun.l.google.com:19302"]
//!
//! [reconnect]
//! delay_ms = 0
//! # max_attempts = 5    # omit for unbounded reconnection
//! ```
//!
//! Every field has a serde default so a partial (or absent) file works on
//! first run. The transport kind is validated eagerly: an unknown kind is a
//! fatal configuration error raised before any connection state exists.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LinkError;
use crate::infrastructure::peer::{BoundedRetries, ReconnectForever, RetryPolicy};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The peer transport kinds the host can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebRtc,
}

impl FromStr for TransportKind {
    type Err = LinkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "webrtc" => Ok(TransportKind::WebRtc),
            other => Err(LinkError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// Top-level host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Peer transport kind; only `"webrtc"` is supported.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// WebSocket URL of the signaling relay.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// STUN/TURN server URLs handed to the transport.
    #[serde(default)]
    pub ice_servers: Vec<String>,
    /// `tracing` log level for the embedding binary.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Reconnection behaviour after a transport-level close.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Reconnection policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Delay between attempts in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// Attempt cap; `None` reconnects forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl HostConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration file, falling back to defaults when the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found" and [`ConfigError::Parse`] for malformed TOML.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    /// Validates the configured transport kind.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnsupportedTransport`] for unknown kinds — fail
    /// fast, before any partial state is built.
    pub fn transport_kind(&self) -> Result<TransportKind, LinkError> {
        self.transport.parse()
    }
}

impl ReconnectConfig {
    /// The retry policy this configuration describes.
    pub fn policy(&self) -> Arc<dyn RetryPolicy> {
        let delay = std::time::Duration::from_millis(self.delay_ms);
        match self.max_attempts {
            Some(max_attempts) => Arc::new(BoundedRetries { max_attempts, delay }),
            None if self.delay_ms == 0 => Arc::new(ReconnectForever),
            None => Arc::new(DelayedForever { delay }),
        }
    }
}

/// Unbounded reconnection with a fixed pause between attempts.
struct DelayedForever {
    delay: std::time::Duration,
}

impl RetryPolicy for DelayedForever {
    fn next_delay(&self, _attempt: u32) -> Option<std::time::Duration> {
        Some(self.delay)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_transport() -> String {
    "webrtc".to_string()
}
fn default_relay_url() -> String {
    "ws://127.0.0.1:9400".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            relay_url: default_relay_url(),
            ice_servers: Vec::new(),
            log_level: default_log_level(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            max_attempts: None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
