//! Domain model structs persisted in the local SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// A person gifts can be addressed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    /// Primary identifier. Unique on this device; collisions with records
    /// created independently on other devices are disambiguated by
    /// `origin_id` during merge.
    pub id: Uuid,
    /// Assigned once at creation, never regenerated by any update or merge.
    pub origin_id: Uuid,
    pub name: String,
    /// Bumped on every local mutation; drives last-write-wins during merge.
    pub last_updated: DateTime<Utc>,
}

impl Recipient {
    /// Build a fresh locally-created recipient with new identifiers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin_id: Uuid::new_v4(),
            name: name.into(),
            last_updated: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gift
// ---------------------------------------------------------------------------

/// A wrapped gift. `image_id` is the scanned QR payload and also the key of
/// the photo blob on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gift {
    pub image_id: Uuid,
    pub origin_id: Uuid,
    pub label: Option<String>,
    /// Tombstone flag. Archived gifts are hidden from normal listings but
    /// keep their row so the deletion propagates to peers.
    pub is_archived: bool,
    pub last_updated: DateTime<Utc>,
}

impl Gift {
    /// Build a fresh locally-created gift for a scanned code.
    pub fn new(image_id: Uuid, label: Option<String>) -> Self {
        Self {
            image_id,
            origin_id: Uuid::new_v4(),
            label,
            is_archived: false,
            last_updated: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync metadata
// ---------------------------------------------------------------------------

/// Per-record metadata consulted when deciding whether a remote copy
/// supersedes the local one. Cheap to load for the whole table at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMeta {
    pub origin_id: Uuid,
    pub last_updated: DateTime<Utc>,
    pub is_archived: bool,
}
