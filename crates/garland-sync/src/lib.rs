//! # garland-sync
//!
//! The peer-to-peer synchronization core: a request/response RPC layer over
//! the local-network transport, and the changelist reconciliation engine
//! that merges two independently grown gift databases with last-write-wins
//! semantics gated on origin-id equality.
//!
//! Structure:
//! - [`client`]: issues outbound typed requests and correlates replies.
//! - [`router`]: answers incoming requests from the local record store.
//! - [`reconcile`]: the pure pull/skip/archive decision per changelist entry.
//! - [`engine`]: drives a sync session (recipients first, then gifts).
//! - [`node`]: glues transport notifications to client, router and engine.

pub mod client;
pub mod engine;
pub mod events;
pub mod node;
pub mod reconcile;
pub mod router;

mod error;

pub use client::SyncClient;
pub use engine::{EngineConfig, SyncEngine};
pub use error::SyncError;
pub use events::{SkipReason, SyncEvent};
pub use node::{NodeConfig, Role, SyncNode};
pub use reconcile::{classify, PullAction};
pub use router::Router;
