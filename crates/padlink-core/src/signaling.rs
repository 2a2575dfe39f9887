//! Signaling and relay wire types.
//!
//! While a peer link is negotiated, the two sides exchange JSON messages
//! through an out-of-band pub/sub relay, one logical sub-channel per
//! [`crate::LinkId`]:
//!
//! ```json
//! {"type":"offer","sdp":"v=0..."}
//! {"type":"answer","sdp":"v=0..."}
//! {"type":"candidate","mark":"f3a1...","data":{"candidate":"candidate:...","sdpMid":"0","sdpMLineIndex":0}}
//! ```
//!
//! Candidate messages carry the publishing peer's `mark` so each side can
//! ignore candidates it published itself — the relay delivers a publish back
//! to the publisher when it is subscribed to the channel.
//!
//! The relay itself is message-agnostic; its framing (`RelayRequest` /
//! `RelayDelivery`) only names a channel and carries an opaque JSON value.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Signaling messages ────────────────────────────────────────────────────────

/// One message exchanged through the signaling relay for a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Session-description offer published by the controller peer.
    Offer { sdp: String },
    /// Session-description answer published by the host.
    Answer { sdp: String },
    /// One ICE candidate, tagged with the publisher's loopback marker.
    Candidate { mark: String, data: IceCandidate },
}

impl SignalMessage {
    /// Returns the message kind used for subscription routing.
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalMessage::Offer { .. } => SignalKind::Offer,
            SignalMessage::Answer { .. } => SignalKind::Answer,
            SignalMessage::Candidate { .. } => SignalKind::Candidate,
        }
    }
}

/// Routing key for signaling subscriptions and one-shot waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        };
        f.write_str(name)
    }
}

/// An ICE candidate in browser JSON field spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate attribute line.
    pub candidate: String,
    /// Media-description identification tag.
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

// ── Relay framing ─────────────────────────────────────────────────────────────

/// Client-to-relay operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RelayRequest {
    /// Start receiving publishes on `channel`.
    Subscribe { channel: String },
    /// Stop receiving publishes on `channel`.
    Unsubscribe { channel: String },
    /// Deliver `data` to every current subscriber of `channel`.
    Publish {
        channel: String,
        data: serde_json::Value,
    },
}

/// Relay-to-client delivery of one published value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDelivery {
    pub channel: String,
    pub data: serde_json::Value,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_serializes_with_lowercase_type() {
        let msg = SignalMessage::Offer {
            sdp: "v=0".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_answer_round_trips() {
        let msg = SignalMessage::Answer {
            sdp: "v=0\r\no=-".to_string(),
        };
        let text = serde_json::to_string(&msg).unwrap();
        let restored: SignalMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn test_candidate_uses_browser_field_spelling() {
        let msg = SignalMessage::Candidate {
            mark: "abcdef".to_string(),
            data: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.168.1.10 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "candidate");
        assert_eq!(json["mark"], "abcdef");
        assert_eq!(json["data"]["sdpMid"], "0");
        assert_eq!(json["data"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_candidate_without_mid_omits_optional_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:...".to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        let json = serde_json::to_string(&candidate).unwrap();
        assert!(!json.contains("sdpMid"));
        assert!(!json.contains("sdpMLineIndex"));
    }

    #[test]
    fn test_kind_matches_variant() {
        let offer = SignalMessage::Offer { sdp: String::new() };
        assert_eq!(offer.kind(), SignalKind::Offer);
        assert_eq!(SignalKind::Candidate.to_string(), "candidate");
    }

    #[test]
    fn test_unknown_signal_type_is_a_parse_error() {
        let result: Result<SignalMessage, _> =
            serde_json::from_str(r#"{"type":"renegotiate","sdp":""}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_relay_request_tagged_by_op() {
        let request = RelayRequest::Subscribe {
            channel: "/p1".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"op": "subscribe", "channel": "/p1"}));
    }

    #[test]
    fn test_relay_publish_round_trips_with_payload() {
        let request = RelayRequest::Publish {
            channel: "/p1".to_string(),
            data: json!({"type": "offer", "sdp": "v=0"}),
        };
        let text = serde_json::to_string(&request).unwrap();
        let restored: RelayRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, request);
    }

    #[test]
    fn test_relay_delivery_round_trips() {
        let delivery = RelayDelivery {
            channel: "/p2".to_string(),
            data: json!({"type": "answer", "sdp": "v=0"}),
        };
        let text = serde_json::to_string(&delivery).unwrap();
        let restored: RelayDelivery = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, delivery);
    }
}
