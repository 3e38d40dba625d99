//! Retry scheduling: an explicit priority queue of (entry, due instant)
//! pairs so backoff can be tested by advancing a virtual clock instead of
//! waiting on wall-clock timers.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::models::EntryId;

/// Exponential backoff policy: doubles per attempt from an initial delay up
/// to a cap.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial_ms: i64,
    max_ms: i64,
}

impl BackoffPolicy {
    /// Build a policy from the configured initial and maximum delays.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_ms: initial.as_millis() as i64,
            max_ms: max.as_millis() as i64,
        }
    }

    /// Delay before the given attempt (1-based): initial * 2^(attempt-1),
    /// capped at the maximum.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> i64 {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_ms
            .saturating_mul(1_i64 << doublings)
            .min(self.max_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Min-heap of scheduled retry attempts.
///
/// The map holds each entry's current deadline; heap items that no longer
/// match it (cancelled or rescheduled) are skipped when they surface.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    heap: BinaryHeap<Reverse<(i64, EntryId)>>,
    deadline: HashMap<EntryId, i64>,
}

impl RetryScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an entry to become due at `at` (Unix ms), replacing any
    /// earlier schedule for the same entry.
    pub fn schedule(&mut self, entry_id: EntryId, at: i64) {
        self.deadline.insert(entry_id, at);
        self.heap.push(Reverse((at, entry_id)));
    }

    /// Drop an entry from the schedule if it is waiting.
    pub fn cancel(&mut self, entry_id: &EntryId) {
        self.deadline.remove(entry_id);
    }

    /// Pop every entry whose due instant has passed, earliest first.
    pub fn due(&mut self, now: i64) -> Vec<EntryId> {
        let mut ready = Vec::new();
        while let Some(Reverse((at, entry_id))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            // Stale item: cancelled or superseded by a newer schedule
            if self.deadline.get(&entry_id) != Some(&at) {
                continue;
            }
            self.deadline.remove(&entry_id);
            ready.push(entry_id);
        }
        ready
    }

    /// Earliest due instant still waiting, if any.
    #[must_use]
    pub fn next_due_at(&self) -> Option<i64> {
        self.deadline.values().copied().min()
    }

    /// Whether nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadline.is_empty()
    }
}
