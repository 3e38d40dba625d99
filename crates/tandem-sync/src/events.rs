//! Typed events published to host subscribers.

use crate::models::{ConflictRecord, Mutation, SyncState};

/// Engine notifications delivered over a broadcast channel.
///
/// Subscription replaces ad-hoc callback registration: delivery order is the
/// publication order, and a dropped receiver simply stops observing.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A conflict was detected and needs (or received) resolution
    ConflictDetected(ConflictRecord),
    /// A conflict was resolved; the merged mutation was re-enqueued
    ConflictResolved {
        record: ConflictRecord,
        mutation: Mutation,
    },
    /// The sync state snapshot changed
    SyncStateChanged(SyncState),
}
