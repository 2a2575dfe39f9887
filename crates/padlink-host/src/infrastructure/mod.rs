//! Infrastructure layer for the host SDK.
//!
//! Contains the transport-facing adapters: the signaling channel over a
//! relay client, the peer-link negotiation machinery, the WebRTC endpoint,
//! and in-memory implementations used by tests.
//!
//! **Dependency rule**: this layer may depend on `padlink_core`, but must not
//! be imported by the domain types in core. The `application` layer talks to
//! it through the traits exported here.

pub mod peer;
pub mod signaling;
