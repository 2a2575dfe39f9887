//! # padlink-core
//!
//! Shared library for padlink containing the device-link wire protocol,
//! the chunked bulk-transfer codec, control-plane envelope types, signaling
//! message types, and the link domain model.
//!
//! This crate is used by the host SDK and the signaling relay. It has zero
//! dependencies on network sockets, timers, or the async runtime.
//!
//! # Architecture overview
//!
//! padlink lets an application running a primary display ("host") accept
//! remote controller peers — typically phones — each contributing real-time
//! input events over a negotiated point-to-point channel. This crate defines
//! what travels over that channel and over the signaling relay beside it:
//!
//! - **`protocol`** – The two data-channel wire formats. Real-time input
//!   events are compact fixed-layout binary records (2-byte tag + fields,
//!   little-endian). Bulk media transfers are chunk frames with a fixed
//!   20-byte header carrying byte ranges, reassembled by chunk id. The
//!   control plane rides the channel's text path as JSON `{type, payload}`
//!   envelopes.
//!
//! - **`signaling`** – JSON messages exchanged through the out-of-band
//!   pub/sub relay while a peer link is negotiated: session-description
//!   offers/answers and marker-tagged ICE candidates, plus the relay's own
//!   subscribe/publish framing.
//!
//! - **`domain`** – Link identity (`LinkId`, stable across reconnects) and
//!   the observable `ConnectionState` machine.

pub mod domain;
pub mod protocol;
pub mod signaling;

// Re-export the most-used types at the crate root so callers can write
// `padlink_core::LinkId` instead of `padlink_core::domain::link::LinkId`.
pub use domain::link::{ConnectionState, LinkId};
pub use protocol::chunk::{chunk_ranges, ChunkAssembler, ChunkFrame, MediaPayload, CHUNK_HEADER_LEN};
pub use protocol::control::ControlEnvelope;
pub use protocol::event::{EventTag, InputEvent};
pub use protocol::{decode_frame, ProtocolError, WireFrame};
pub use signaling::{IceCandidate, SignalKind, SignalMessage};
