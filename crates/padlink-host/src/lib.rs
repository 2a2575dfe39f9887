//! padlink-host library entry point.
//!
//! The host SDK for padlink: accepts remote controller peers through a
//! signaling relay, negotiates one data channel per peer, and exposes each
//! peer as a [`application::device::Device`] with typed input-event streams
//! and flow-controlled bulk transfer.
//!
//! # Layering
//!
//! - **`application`** – Use cases consumed by the embedding application:
//!   the link registry (await/broadcast/remove), the device facade, and the
//!   media-share host flow. Depends only on the traits in `infrastructure`.
//! - **`infrastructure`** – The transport adapters: the signaling channel
//!   over a relay client, the peer-link negotiation/reconnection machinery,
//!   the WebRTC endpoint, and in-memory mocks for tests.
//!
//! Re-exports all public modules so integration tests in `tests/` share the
//! same module tree.

pub mod application;
pub mod config;
pub mod error;
pub mod infrastructure;

pub use application::device::Device;
pub use application::registry::LinkRegistry;
pub use config::{HostConfig, TransportKind};
pub use error::{LinkError, SignalError};
