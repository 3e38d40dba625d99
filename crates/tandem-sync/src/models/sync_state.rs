//! Sync state snapshot shared with host applications.

use serde::{Deserialize, Serialize};

use super::ConflictId;

/// Connectivity as reported by the transport collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Offline,
    Connecting,
    Online,
}

/// Coarse-grained status of the overall queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Nothing queued and nothing has synced yet
    Idle,
    /// At least one entry is pending or in flight
    Syncing,
    /// Queue drained with zero active conflicts
    Synced,
    /// At least one entry exhausted retries or is blocked on a conflict
    Failed,
}

/// Point-in-time snapshot of the engine's sync status.
///
/// Owned by the engine's tracker; hosts read snapshots and subscribe to
/// change events, they never write state directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Current connectivity
    pub connection: ConnectionState,
    /// Current sync phase
    pub phase: SyncPhase,
    /// Entries still awaiting delivery (pending, in-flight, retry-scheduled)
    pub pending_count: usize,
    /// Entries that permanently failed
    pub failed_count: usize,
    /// Conflict records still awaiting resolution, oldest first
    pub active_conflicts: Vec<ConflictId>,
    /// When the queue last drained completely (Unix ms)
    pub last_sync_at: Option<i64>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Offline,
            phase: SyncPhase::Idle,
            pending_count: 0,
            failed_count: 0,
            active_conflicts: Vec::new(),
            last_sync_at: None,
        }
    }
}

impl SyncState {
    /// Whether anything is still waiting to reach the server.
    #[must_use]
    pub fn has_unsynced_work(&self) -> bool {
        self.pending_count > 0 || self.failed_count > 0 || !self.active_conflicts.is_empty()
    }
}
