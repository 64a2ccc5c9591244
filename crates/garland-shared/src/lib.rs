//! # garland-shared
//!
//! Wire protocol and data transfer types shared by every Garland crate:
//! the request/response envelope codec, invocation names, record snapshots
//! exchanged during sync, and the protocol error type.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod records;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{Envelope, ErrorFrame, Invocation, Request, Response};
pub use records::{ChangeSummary, Changelist, GiftOwnership, GiftQuery, GiftRecord, RecipientRecord};
pub use types::{PeerRef, RecordKind};
