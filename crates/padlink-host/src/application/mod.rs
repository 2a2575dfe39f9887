//! Application layer of the host SDK.
//!
//! The use cases the embedding application works with:
//!
//! - **`registry`** – Owns the set of linked devices: await a peer by id,
//!   broadcast control commands with per-device confirmation, tear links
//!   down.
//! - **`device`** – The facade over one peer link: typed input-event
//!   subscriptions, send primitives, and the flow-controlled chunk sender.
//! - **`media_share`** – The host side of the bulk-transfer use case:
//!   serves share requests and streams captured media fragments.
//!
//! This layer depends on the `infrastructure` traits, never on a concrete
//! transport.

pub mod device;
pub mod media_share;
pub mod registry;
