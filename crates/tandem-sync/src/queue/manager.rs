//! Mutation queue manager: decides what to submit next and when.
//!
//! Single logical owner of the queue. The engine serializes access, so no
//! two callers mutate the same entry concurrently; submission attempts for
//! distinct entities run in parallel up to the configured worker count.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::{EntryId, EntryStatus, Mutation, OperationKind, QueueEntry};
use crate::store::{EntryPatch, QueueStore};

use super::scheduler::{BackoffPolicy, RetryScheduler};

/// What happened to a mutation handed to [`QueueManager::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The mutation entered the queue
    Enqueued(QueueEntry),
    /// A delete for the same entity is already queued; the update was
    /// dropped so it cannot resurrect the deleted record
    SupersededByDelete,
}

/// Outcome of recording a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Retry scheduled for the given instant (Unix ms)
    Scheduled { at: i64 },
    /// The configured attempt limit was reached; entry is terminally failed
    Exhausted,
}

/// Owns ordering, retry scheduling, and prioritization of pending mutations.
pub struct QueueManager {
    store: QueueStore,
    scheduler: RetryScheduler,
    backoff: BackoffPolicy,
    in_flight: HashSet<String>,
    paused_for_auth: bool,
    max_attempts: Option<u32>,
    worker_count: usize,
}

impl QueueManager {
    /// Create a manager over the given durable store.
    pub fn new(
        store: QueueStore,
        backoff: BackoffPolicy,
        max_attempts: Option<u32>,
        worker_count: usize,
    ) -> Self {
        Self {
            store,
            scheduler: RetryScheduler::new(),
            backoff,
            in_flight: HashSet::new(),
            paused_for_auth: false,
            max_attempts,
            worker_count: worker_count.max(1),
        }
    }

    /// Reload persisted entries after a process restart.
    ///
    /// Entries left `InFlight` by a crash roll back to `Pending`; scheduled
    /// retries re-enter the scheduler at their persisted instants.
    pub fn load(&mut self) -> Result<Vec<QueueEntry>> {
        let mut entries = self.store.list()?;
        for entry in &mut entries {
            match entry.status {
                EntryStatus::InFlight => {
                    *entry = self
                        .store
                        .update(&entry.id, &EntryPatch::status(EntryStatus::Pending))?;
                    tracing::warn!(entry_id = %entry.id, "Reset stale in-flight entry after restart");
                }
                EntryStatus::RetryScheduled => {
                    self.scheduler.schedule(entry.id, entry.next_attempt_at);
                }
                _ => {}
            }
        }
        tracing::info!(count = entries.len(), "Loaded persisted queue");
        Ok(entries)
    }

    /// Validate and persist a new mutation.
    ///
    /// Enforces the delete-supersedes-update invariant in both directions:
    /// an incoming update behind a queued delete is dropped, and an incoming
    /// delete drops queued (not yet in-flight) updates for the same entity.
    pub fn enqueue(&mut self, mutation: Mutation, now: i64) -> Result<EnqueueOutcome> {
        mutation.validate()?;
        let entity_key = mutation.entity_key();
        let entries = self.store.list()?;

        if mutation.op == OperationKind::Update {
            let delete_queued = entries.iter().any(|e| {
                e.entity_key() == entity_key
                    && e.mutation.op == OperationKind::Delete
                    && e.status != EntryStatus::Failed
            });
            if delete_queued {
                tracing::debug!(
                    entity = %entity_key,
                    "Dropped update queued behind a delete for the same entity"
                );
                return Ok(EnqueueOutcome::SupersededByDelete);
            }
        }

        if mutation.op == OperationKind::Delete {
            for entry in &entries {
                let droppable = entry.entity_key() == entity_key
                    && entry.mutation.op == OperationKind::Update
                    && matches!(
                        entry.status,
                        EntryStatus::Pending | EntryStatus::RetryScheduled
                    );
                if droppable {
                    self.scheduler.cancel(&entry.id);
                    self.store.remove(&entry.id)?;
                    tracing::debug!(
                        entry_id = %entry.id,
                        entity = %entity_key,
                        "Dropped pending update superseded by delete"
                    );
                }
            }
        }

        let entry = self.store.append(mutation, now)?;
        tracing::debug!(entry_id = %entry.id, entity = %entity_key, op = %entry.mutation.op, "Enqueued mutation");
        Ok(EnqueueOutcome::Enqueued(entry))
    }

    /// Select the next batch of entries to submit and mark them in flight.
    ///
    /// Within an entity, strict FIFO: only the entity's front entry is ever
    /// a candidate, and a waiting retry, blocked, or failed front entry
    /// parks the whole entity. Across entities candidates are ordered by
    /// priority class (delete > update > create) then enqueue time, bounded
    /// by the free worker slots.
    pub fn next_batch(&mut self, now: i64) -> Result<Vec<QueueEntry>> {
        if self.paused_for_auth {
            return Ok(Vec::new());
        }

        // Release due retries back into the pending pool. A storage hiccup
        // keeps the retry alive rather than dropping it from the scheduler.
        for entry_id in self.scheduler.due(now) {
            match self
                .store
                .update(&entry_id, &EntryPatch::status(EntryStatus::Pending))
            {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {}
                Err(err) => {
                    let at = now + self.backoff.delay_ms(1);
                    self.scheduler.schedule(entry_id, at);
                    tracing::warn!(
                        entry_id = %entry_id,
                        error = %err,
                        retry_at = at,
                        "Failed to release due retry; rescheduled"
                    );
                }
            }
        }

        let entries = self.store.list()?;
        let mut seen = HashSet::new();
        let mut candidates: Vec<QueueEntry> = Vec::new();
        for entry in entries {
            let key = entry.entity_key();
            if !seen.insert(key.clone()) || self.in_flight.contains(&key) {
                continue;
            }
            if entry.status == EntryStatus::Pending {
                candidates.push(entry);
            }
        }

        candidates.sort_by(|a, b| {
            (a.mutation.op.priority(), a.enqueued_at, a.id)
                .cmp(&(b.mutation.op.priority(), b.enqueued_at, b.id))
        });

        let capacity = self.worker_count.saturating_sub(self.in_flight.len());
        candidates.truncate(capacity);

        let mut batch = Vec::with_capacity(candidates.len());
        for entry in candidates {
            match self
                .store
                .update(&entry.id, &EntryPatch::status(EntryStatus::InFlight))
            {
                Ok(updated) => {
                    self.in_flight.insert(updated.entity_key());
                    batch.push(updated);
                }
                // Still pending in the store; picked up again next pass
                Err(err) => {
                    tracing::warn!(entry_id = %entry.id, error = %err, "Failed to mark entry in flight; skipped");
                }
            }
        }
        Ok(batch)
    }

    /// The server acknowledged the mutation: the entry leaves the queue.
    pub fn record_ack(&mut self, entry: &QueueEntry) -> Result<()> {
        self.store.remove(&entry.id)?;
        self.in_flight.remove(&entry.entity_key());
        tracing::debug!(entry_id = %entry.id, "Acknowledged and removed entry");
        Ok(())
    }

    /// Put an entry back on the retry path after its outcome could not be
    /// recorded against the store.
    ///
    /// Touches only in-memory state, so it cannot fail; the durable status
    /// is repaired when the scheduled retry becomes due. Returns the retry
    /// instant.
    pub fn requeue_after_storage_error(&mut self, entry: &QueueEntry, now: i64) -> i64 {
        self.in_flight.remove(&entry.entity_key());
        let at = now + self.backoff.delay_ms(entry.attempt_count.saturating_add(1));
        self.scheduler.schedule(entry.id, at);
        at
    }

    /// A conflict blocks the entry until resolution supplies a new mutation.
    pub fn record_conflict_blocked(&mut self, entry: &QueueEntry, reason: &str) -> Result<QueueEntry> {
        let updated = self.store.update(
            &entry.id,
            &EntryPatch::status(EntryStatus::BlockedOnConflict)
                .with_last_error(Some(reason.to_string())),
        )?;
        self.in_flight.remove(&entry.entity_key());
        Ok(updated)
    }

    /// Schedule a retry with exponential backoff, or terminally fail the
    /// entry once the configured attempt limit is reached.
    pub fn record_transient_failure(
        &mut self,
        entry: &QueueEntry,
        error: &str,
        now: i64,
    ) -> Result<RetryDisposition> {
        self.in_flight.remove(&entry.entity_key());
        let attempts = entry.attempt_count + 1;

        if let Some(max) = self.max_attempts {
            if attempts >= max {
                self.store.update(
                    &entry.id,
                    &EntryPatch::status(EntryStatus::Failed)
                        .with_attempts(attempts)
                        .with_last_error(Some(format!("retries exhausted: {error}"))),
                )?;
                tracing::warn!(entry_id = %entry.id, attempts, "Entry failed after exhausting retries");
                return Ok(RetryDisposition::Exhausted);
            }
        }

        let at = now + self.backoff.delay_ms(attempts);
        self.store.update(
            &entry.id,
            &EntryPatch::status(EntryStatus::RetryScheduled)
                .with_attempts(attempts)
                .with_next_attempt_at(at)
                .with_last_error(Some(error.to_string())),
        )?;
        self.scheduler.schedule(entry.id, at);
        tracing::debug!(entry_id = %entry.id, attempts, retry_at = at, "Scheduled retry");
        Ok(RetryDisposition::Scheduled { at })
    }

    /// A malformed mutation permanently fails; it is never retried.
    pub fn record_validation_failure(&mut self, entry: &QueueEntry, error: &str) -> Result<QueueEntry> {
        self.in_flight.remove(&entry.entity_key());
        let updated = self.store.update(
            &entry.id,
            &EntryPatch::status(EntryStatus::Failed).with_last_error(Some(error.to_string())),
        )?;
        tracing::warn!(entry_id = %entry.id, error, "Entry rejected by server validation");
        Ok(updated)
    }

    /// Credentials expired mid-flight: the entry goes back to pending (the
    /// attempt does not count) and the whole queue pauses.
    pub fn record_auth_pause(&mut self, entry: &QueueEntry) -> Result<()> {
        self.store
            .update(&entry.id, &EntryPatch::status(EntryStatus::Pending))?;
        self.in_flight.remove(&entry.entity_key());
        self.paused_for_auth = true;
        tracing::warn!(entry_id = %entry.id, "Paused submissions: authentication expired");
        Ok(())
    }

    /// Resume submissions after the host signals re-authentication.
    pub fn resume_after_auth(&mut self) {
        if self.paused_for_auth {
            self.paused_for_auth = false;
            tracing::info!("Resumed submissions after re-authentication");
        }
    }

    /// Whether submissions are paused awaiting re-authentication.
    #[must_use]
    pub const fn is_paused_for_auth(&self) -> bool {
        self.paused_for_auth
    }

    /// Cancel a not-yet-submitted entry (user deleted the edit locally).
    ///
    /// In-flight entries cannot be cancelled; the attempt has already left.
    pub fn cancel(&mut self, entry_id: &EntryId) -> Result<QueueEntry> {
        let entry = self
            .store
            .get(entry_id)?
            .ok_or_else(|| Error::NotFound(format!("queue entry {entry_id}")))?;
        if entry.status == EntryStatus::InFlight {
            return Err(Error::InvalidInput(format!(
                "entry {entry_id} is in flight and cannot be cancelled"
            )));
        }
        self.scheduler.cancel(entry_id);
        self.store.remove(entry_id)?;
        tracing::debug!(entry_id = %entry_id, "Cancelled pending entry");
        Ok(entry)
    }

    /// Remove the blocked entry a resolution supersedes, if it still exists.
    pub fn remove_blocked_entry(
        &mut self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<EntryId>> {
        let blocked = self.store.list()?.into_iter().find(|e| {
            e.status == EntryStatus::BlockedOnConflict
                && e.mutation.entity_type == entity_type
                && e.mutation.entity_id == entity_id
        });
        let Some(entry) = blocked else {
            return Ok(None);
        };
        self.store.remove(&entry.id)?;
        Ok(Some(entry.id))
    }

    /// (pending-work, failed) entry counts for the sync state snapshot.
    pub fn counts(&self) -> Result<(usize, usize)> {
        let entries = self.store.list()?;
        let pending = entries.iter().filter(|e| e.status.is_pending_work()).count();
        let failed = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .count();
        Ok((pending, failed))
    }

    /// All entries, oldest first (for host inspection).
    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        self.store.list()
    }

    /// Earliest scheduled retry instant, if any.
    #[must_use]
    pub fn next_due_at(&self) -> Option<i64> {
        self.scheduler.next_due_at()
    }
}
