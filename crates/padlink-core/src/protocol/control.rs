//! Control-plane envelope types.
//!
//! Session-level commands and application-level handshakes ride the data
//! channel's text path as JSON objects with a `"type"` discriminant and a
//! free-form `"payload"`:
//!
//! ```json
//! {"type":"start","payload":{"isVertical":true,"functions":["touch"]}}
//! {"type":"start_confirm","payload":{}}
//! ```
//!
//! A command addressed to all linked devices is confirmed per device with a
//! correspondingly-typed `"<cmd>_confirm"` envelope. The payload stays a raw
//! `serde_json::Value` in the envelope so the transport never constrains
//! application payload shapes; the typed payload structs below cover the
//! built-in commands and the media-share handshake.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ── Command types ─────────────────────────────────────────────────────────────

/// Starts the controllers with a layout/function configuration.
pub const COMMAND_START: &str = "start";
/// Per-device confirmation of [`COMMAND_START`].
pub const COMMAND_START_CONFIRM: &str = "start_confirm";
/// Pushes updated configuration to the controllers.
pub const COMMAND_CONFIG: &str = "config";
/// Per-device confirmation of [`COMMAND_CONFIG`].
pub const COMMAND_CONFIG_CONFIRM: &str = "config_confirm";

/// Controller asks the host to start sharing the current media fragment.
pub const SHARE_REQUEST: &str = "share-request";
/// Host's structured reply to [`SHARE_REQUEST`].
pub const SHARE_REQUEST_REPLY: &str = "share-request-reply";
/// Controller asks the host to stop an active share.
pub const SHARE_REQUEST_STOP: &str = "share-request-stop";
/// Host's structured reply to [`SHARE_REQUEST_STOP`].
pub const SHARE_REQUEST_STOP_REPLY: &str = "share-request-stop-reply";

// ── Controller function names ─────────────────────────────────────────────────

pub const FUNCTION_TOUCH: &str = "touch";
pub const FUNCTION_GAMEPAD: &str = "gamepad";
pub const FUNCTION_GYROSCOPE: &str = "gyroscope";
pub const FUNCTION_GYROSCOPE_GAMEPAD: &str = "gyroscope_gamepad";
pub const FUNCTION_MOVE: &str = "move";
pub const FUNCTION_MEDIA_SHARE: &str = "media_share";

/// Returns the confirmation type for a command (`"start"` → `"start_confirm"`).
pub fn confirm_type(command: &str) -> String {
    format!("{command}_confirm")
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One control-plane message: a type discriminant plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    /// Message type; selects the waiters and subscribers that receive it.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form payload; `{}` when the message carries no data.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ControlEnvelope {
    /// Builds an envelope from an already-serialized payload value.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Builds an envelope by serializing a typed payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error if the payload cannot be
    /// represented as JSON.
    pub fn from_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Deserializes the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error on shape mismatch.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// The confirmation type expected in reply to this envelope.
    pub fn confirm_kind(&self) -> String {
        confirm_type(&self.kind)
    }
}

// ── Built-in command payloads ─────────────────────────────────────────────────

/// Payload of the `start` command: screen orientation plus the controller
/// functions the host wants enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPayload {
    /// `true` when the host surface is portrait-oriented.
    #[serde(rename = "isVertical")]
    pub is_vertical: bool,
    /// Function names to enable, see the `FUNCTION_*` constants.
    #[serde(default)]
    pub functions: Vec<String>,
}

/// Payload of the `config` command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub touch: Option<TouchConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_share: Option<MediaShareConfig>,
}

/// Touch-surface configuration pushed to controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchConfig {
    /// Host surface height divided by width; controllers mirror the shape.
    #[serde(rename = "aspectRatio")]
    pub aspect_ratio: f64,
}

/// Media-share configuration pushed to controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaShareConfig {
    /// Stream container kind, e.g. `"hls"`.
    #[serde(rename = "type")]
    pub kind: String,
}

// ── Media-share handshake payloads ────────────────────────────────────────────

/// Payload of a `share-request` from a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRequestPayload {
    /// Controller-side timestamp of the request, seconds.
    pub timestamp: f64,
}

/// Host reply to a `share-request`.
///
/// A negative reply (`ok: false`) carries a reason and zeroed fields; the
/// channel itself stays healthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Playback offset into the fragment at the time of the request, seconds.
    pub offset: f64,
    /// Fragment length in bytes.
    pub length: u64,
    /// Fragment playback duration, seconds.
    pub duration: f64,
}

impl ShareReply {
    /// Builds the negative reply used when the host cannot serve the request.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            offset: 0.0,
            length: 0,
            duration: 0.0,
        }
    }
}

/// Host reply to a `share-request-stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareStopReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Playback offset into the final fragment when capture stopped, seconds.
    pub keep: f64,
    /// Index of the final captured fragment.
    pub keep_id: u32,
    /// Byte length of the final fragment.
    pub keep_full_length: u64,
    /// Playback duration of the final fragment, seconds.
    pub keep_full_duration: f64,
}

impl ShareStopReply {
    /// Builds the negative reply used when no capture is active.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            keep: 0.0,
            keep_id: 0,
            keep_full_length: 0,
            keep_full_duration: 0.0,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
