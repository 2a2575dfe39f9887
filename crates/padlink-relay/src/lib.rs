//! padlink-relay library entry point.
//!
//! The relay is a dumb pub/sub pipe for signaling traffic: WebSocket clients
//! subscribe to channels by name and publish JSON values into them; every
//! publish fans out to every current subscriber of that channel — including
//! the publisher itself when subscribed, which the candidate marker scheme
//! on the peers relies on. No acks, no retry, no persistence.
//!
//! Re-exports the modules so integration tests in `tests/` and the binary in
//! `main.rs` share the same tree.

pub mod hub;
pub mod server;

pub use hub::Hub;
pub use server::{run_server, serve, RelayConfig};
