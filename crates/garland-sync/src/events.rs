//! Typed sync-progress events.
//!
//! The engine publishes these on an mpsc channel instead of calling back
//! into any UI shape; subscribers render progress however they like.

use uuid::Uuid;

use garland_shared::RecordKind;

/// Why a changelist entry produced no pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Local copy is the same age or newer.
    UpToDate,
    /// Same id, different origin: a collision between independently created
    /// records, never merged.
    OriginMismatch,
    /// Remote tombstone for a record that is already archived here.
    AlreadyArchived,
    /// Remote tombstone for a record this device never had.
    AbsentTombstone,
}

/// Progress of a sync session, in emission order.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A phase began; `pending` counts the records that will be touched.
    PhaseStarted { kind: RecordKind, pending: usize },
    /// One record was pulled (or tombstoned) and committed.
    RecordSynced {
        kind: RecordKind,
        id: Uuid,
        remaining: usize,
    },
    /// One changelist entry needed no work.
    RecordSkipped {
        kind: RecordKind,
        id: Uuid,
        reason: SkipReason,
    },
    /// One record's pull or commit failed; siblings are unaffected.
    RecordFailed {
        kind: RecordKind,
        id: Uuid,
        message: String,
    },
    /// A phase finished cleanly.
    PhaseCompleted { kind: RecordKind },
    /// The whole session finished cleanly.
    Completed,
    /// The session stopped early.
    Failed { message: String },
}
