//! The pull decision.
//!
//! Given one remote changelist entry and whatever is known locally about the
//! same record id, decide whether the full record must be pulled, the local
//! copy archived in place, or nothing done. This is the heart of the merge:
//! last-write-wins on strictly newer timestamps, gated on origin-id equality
//! so colliding ids from independently created databases never merge.

use garland_shared::records::ChangeSummary;
use garland_store::SyncMeta;

use crate::events::SkipReason;

/// What to do about one remote changelist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullAction {
    /// Pull the full record from the peer and upsert it.
    Fetch,
    /// Archive the local copy in place; a tombstone needs no body transfer.
    ArchiveLocal,
    /// Leave the local store untouched.
    Skip(SkipReason),
}

/// Classify one remote entry against the local record metadata (if any).
pub fn classify(remote: &ChangeSummary, local: Option<&SyncMeta>) -> PullAction {
    let Some(local) = local else {
        // Nothing local. A tombstone for a record we never had needs no
        // action; anything else is new to us.
        return if remote.is_deleted {
            PullAction::Skip(SkipReason::AbsentTombstone)
        } else {
            PullAction::Fetch
        };
    };

    if local.origin_id != remote.origin_id {
        // Same id, different origin: two distinct logical records that
        // happen to collide. Never merged, regardless of timestamps.
        return PullAction::Skip(SkipReason::OriginMismatch);
    }

    if remote.is_deleted {
        // Deletions propagate without a timestamp race; the tombstone only
        // needs applying once.
        return if local.is_archived {
            PullAction::Skip(SkipReason::AlreadyArchived)
        } else {
            PullAction::ArchiveLocal
        };
    }

    if remote.last_updated > local.last_updated {
        PullAction::Fetch
    } else {
        PullAction::Skip(SkipReason::UpToDate)
    }
}
