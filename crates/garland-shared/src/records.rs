//! Record snapshots and changelist summaries exchanged between peers.
//!
//! These are the wire shapes of the persisted models: full snapshots carry
//! every syncable field plus the relationship ids, changelist summaries carry
//! just enough to decide staleness without transferring whole records.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Full snapshot of a recipient, as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipientRecord {
    pub id: Uuid,
    /// Assigned once at creation on the originating device, never changed.
    pub origin_id: Uuid,
    pub name: String,
    pub last_updated: DateTime<Utc>,
    /// Image ids of gifts addressed to this recipient. Informational on the
    /// wire; the gift side of the relationship is authoritative during merge.
    pub gifts: BTreeSet<Uuid>,
}

/// Full snapshot of a gift, as sent over the wire.
///
/// `image_id` doubles as the QR-code payload and the photo's storage key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GiftRecord {
    pub image_id: Uuid,
    pub origin_id: Uuid,
    pub label: Option<String>,
    /// Soft-delete flag. An archived gift is a tombstone: the record survives
    /// so the deletion can propagate, the photo does not.
    pub is_archived: bool,
    pub last_updated: DateTime<Utc>,
    pub recipients: BTreeSet<Uuid>,
    /// Photo bytes, attached by the serving peer when available.
    pub photo: Option<Vec<u8>>,
}

/// One changelist entry: the per-record summary used to decide whether a
/// full snapshot needs to be pulled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSummary {
    pub last_updated: DateTime<Utc>,
    pub is_deleted: bool,
    pub origin_id: Uuid,
}

/// Record id -> change summary, for every record a peer knows about.
pub type Changelist = HashMap<Uuid, ChangeSummary>;

/// Body of a `giftQuery/{uuid}` request: the recipient ids the querying
/// device claims to act for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GiftQuery {
    pub candidates: BTreeSet<Uuid>,
}

/// Answer to a gift ownership query.
///
/// When `matching` is empty the querying device did not act for any true
/// recipient of the gift, and `recipients` MUST be `None`; the true recipient
/// list is never revealed to a non-match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GiftOwnership {
    /// Intersection of the queried candidates and the gift's true recipients.
    pub matching: BTreeSet<Uuid>,
    /// Full recipient snapshots, present only for a legitimate match.
    pub recipients: Option<Vec<RecipientRecord>>,
    pub message: Option<String>,
}

impl GiftOwnership {
    pub fn is_match(&self) -> bool {
        !self.matching.is_empty()
    }
}
