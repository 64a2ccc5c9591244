//! # garland-store
//!
//! Local persistence for the Garland application: a SQLite-backed record
//! store for recipients and gifts, and a filesystem photo store keyed by
//! gift image id.
//!
//! The crate exposes a synchronous [`Database`] handle with typed CRUD and
//! merge helpers, plus [`StoreHandle`], which owns the connection on a
//! dedicated thread so async callers can run store closures without blocking
//! their executor.

pub mod database;
pub mod gifts;
pub mod handle;
pub mod migrations;
pub mod models;
pub mod photos;
pub mod recipients;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use gifts::archive_gift_locally;
pub use handle::StoreHandle;
pub use models::*;
pub use photos::PhotoStore;
