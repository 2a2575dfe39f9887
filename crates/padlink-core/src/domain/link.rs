//! Link identity and the connection lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for one remote controller peer.
///
/// A `LinkId` is caller-chosen, globally unique among active links, and names
/// both the relay channel used for signaling and the registry entry for the
/// resulting device. The id survives reconnects: only the underlying channel
/// object is replaced when a peer drops and renegotiates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    /// Wraps a caller-chosen identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LinkId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for LinkId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Observable lifecycle of one peer link.
///
/// The link is a responder: it waits for the remote peer's offer, answers,
/// and reports `Open` once the data channel is ready. A transport-level close
/// moves the link to `Closed` and, unless the close was requested locally,
/// straight back to `AwaitingRemoteOffer` for the next attempt. The device
/// identity attached to the link is unchanged across that cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No negotiation attempt has started yet.
    Idle,
    /// Waiting for the remote peer to publish a session-description offer.
    AwaitingRemoteOffer,
    /// Offer applied; local answer created and published, channel pending.
    Negotiating,
    /// The data channel is ready and frames are flowing.
    Open,
    /// The channel is torn down. Terminal only after a local disconnect.
    Closed,
}

impl ConnectionState {
    /// Returns `true` while a negotiation attempt is in flight.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingRemoteOffer | ConnectionState::Negotiating
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_id_display_matches_inner_string() {
        let id = LinkId::new("p1");
        assert_eq!(id.to_string(), "p1");
        assert_eq!(id.as_str(), "p1");
    }

    #[test]
    fn test_link_id_equality_and_hash_by_value() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(LinkId::from("p1"), 1);
        assert_eq!(map.get(&LinkId::new("p1")), Some(&1));
        assert_eq!(map.get(&LinkId::new("p2")), None);
    }

    #[test]
    fn test_link_id_serializes_as_plain_string() {
        let id = LinkId::new("room-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"room-42\"");

        let restored: LinkId = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, id);
    }

    #[test]
    fn test_is_connecting_only_during_negotiation() {
        assert!(ConnectionState::AwaitingRemoteOffer.is_connecting());
        assert!(ConnectionState::Negotiating.is_connecting());
        assert!(!ConnectionState::Idle.is_connecting());
        assert!(!ConnectionState::Open.is_connecting());
        assert!(!ConnectionState::Closed.is_connecting());
    }
}
