//! Queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Mutation;

/// A unique identifier for a queue entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Delivery state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting its turn for submission
    Pending,
    /// Submission attempt currently awaiting a response
    InFlight,
    /// Failed transiently; waiting for its backoff timer
    RetryScheduled,
    /// A conflict was detected; waiting on resolution
    BlockedOnConflict,
    /// Permanently failed (validation error or retries exhausted)
    Failed,
}

impl EntryStatus {
    /// Whether the entry still counts as pending work for the sync phase.
    #[must_use]
    pub const fn is_pending_work(self) -> bool {
        matches!(self, Self::Pending | Self::InFlight | Self::RetryScheduled)
    }
}

/// A mutation plus its delivery and retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique identifier of this entry
    pub id: EntryId,
    /// The mutation awaiting delivery
    pub mutation: Mutation,
    /// Current delivery state
    pub status: EntryStatus,
    /// Number of submission attempts made so far
    pub attempt_count: u32,
    /// Earliest instant the next attempt may run (Unix ms; 0 = immediately)
    pub next_attempt_at: i64,
    /// Human-readable reason the entry is stuck, if it is
    pub last_error: Option<String>,
    /// When the entry entered the queue (Unix ms)
    pub enqueued_at: i64,
}

impl QueueEntry {
    /// Wrap a mutation for the queue.
    #[must_use]
    pub fn new(mutation: Mutation, enqueued_at: i64) -> Self {
        Self {
            id: EntryId::new(),
            mutation,
            status: EntryStatus::Pending,
            attempt_count: 0,
            next_attempt_at: 0,
            last_error: None,
            enqueued_at,
        }
    }

    /// Key identifying the entity this entry targets.
    #[must_use]
    pub fn entity_key(&self) -> String {
        self.mutation.entity_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mutation;

    #[test]
    fn test_new_entry_defaults() {
        let m = Mutation::delete("list_item", "item-1", 3, "client-a", 1_000);
        let entry = QueueEntry::new(m, 2_000);

        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.attempt_count, 0);
        assert_eq!(entry.next_attempt_at, 0);
        assert_eq!(entry.enqueued_at, 2_000);
        assert!(entry.last_error.is_none());
    }

    #[test]
    fn test_pending_work_classification() {
        assert!(EntryStatus::Pending.is_pending_work());
        assert!(EntryStatus::InFlight.is_pending_work());
        assert!(EntryStatus::RetryScheduled.is_pending_work());
        assert!(!EntryStatus::BlockedOnConflict.is_pending_work());
        assert!(!EntryStatus::Failed.is_pending_work());
    }

    #[test]
    fn test_entry_id_parse() {
        let id = EntryId::new();
        let parsed: EntryId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
