//! Engine façade: wires the queue manager, conflict pipeline, and sync
//! tracker together behind one cloneable handle.
//!
//! All host interaction goes through [`SyncEngine`]: enqueue local edits,
//! report connectivity, answer manual conflicts, observe state. The engine
//! never opens connections; submissions go through the [`Transport`] seam.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conflict::{
    detect, ConflictResolver, Detection, FieldChoice, Resolution, ResolutionStrategy,
};
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::models::{
    ConflictId, ConflictRecord, ConflictStatus, ConnectionState, EntryId, Mutation, QueueEntry,
    SyncState,
};
use crate::queue::{BackoffPolicy, EnqueueOutcome, QueueManager};
use crate::store::{ConflictStore, KvStore, QueueStore};
use crate::sync::SyncTracker;
use crate::transport::{SubmitResponse, Transport};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct EngineInner<T> {
    manager: tokio::sync::Mutex<QueueManager>,
    conflicts: ConflictStore,
    resolver: ConflictResolver,
    tracker: Mutex<SyncTracker>,
    transport: T,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    notify: Notify,
    shutdown: AtomicBool,
}

impl<T> EngineInner<T> {
    fn tracker(&self) -> Result<MutexGuard<'_, SyncTracker>> {
        self.tracker
            .lock()
            .map_err(|_| Error::Storage("sync tracker lock poisoned".into()))
    }

    fn emit(&self, event: EngineEvent) -> Result<()> {
        self.tracker()?.emit(event);
        Ok(())
    }
}

/// Offline mutation queue and conflict resolution engine.
///
/// Cheap to clone; all clones share the same queue, conflict history, and
/// sync state.
pub struct SyncEngine<T> {
    inner: Arc<EngineInner<T>>,
}

impl<T> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> SyncEngine<T> {
    /// Open the engine over the given durable store, reloading any queue
    /// entries that survived a restart.
    pub fn new(kv: Arc<dyn KvStore>, transport: T, config: EngineConfig) -> Result<Self> {
        Self::with_clock(kv, transport, config, Arc::new(SystemClock))
    }

    /// Like [`SyncEngine::new`] with an explicit time source.
    pub fn with_clock(
        kv: Arc<dyn KvStore>,
        transport: T,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let queue_store = QueueStore::new(Arc::clone(&kv));
        let conflicts = ConflictStore::new(kv, config.conflict_history_cap);
        let backoff = BackoffPolicy::new(config.initial_backoff, config.max_backoff);
        let mut manager = QueueManager::new(
            queue_store,
            backoff,
            config.max_attempts,
            config.worker_count,
        );
        manager.load()?;
        let resolver = ConflictResolver::from_config(&config);

        // Seed the snapshot from whatever survived the restart
        let (pending, failed) = manager.counts()?;
        let active: Vec<ConflictId> = conflicts
            .list_pending()?
            .iter()
            .map(|record| record.id)
            .collect();
        let mut tracker = SyncTracker::new(EVENT_CHANNEL_CAPACITY);
        tracker.update_counts(pending, failed, active, clock.now_ms());

        Ok(Self {
            inner: Arc::new(EngineInner {
                manager: tokio::sync::Mutex::new(manager),
                conflicts,
                resolver,
                tracker: Mutex::new(tracker),
                transport,
                clock,
                config,
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Persist a local edit for submission. Returns immediately; the edit
    /// is durable once this returns.
    pub async fn enqueue(&self, mutation: Mutation) -> Result<EnqueueOutcome> {
        let now = self.inner.clock.now_ms();
        let outcome = self.inner.manager.lock().await.enqueue(mutation, now)?;
        self.refresh_state().await?;
        self.inner.notify.notify_one();
        Ok(outcome)
    }

    /// Host-reported connectivity. Coming back online resumes submission
    /// from the oldest pending entry.
    pub fn set_connectivity(&self, connection: ConnectionState) -> Result<()> {
        if self.inner.tracker()?.set_connection(connection) {
            self.inner.notify.notify_one();
        }
        Ok(())
    }

    /// Resume submissions after the host re-authenticates.
    pub async fn resume_after_auth(&self) -> Result<()> {
        self.inner.manager.lock().await.resume_after_auth();
        self.refresh_state().await?;
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Cancel a queued entry that has not been submitted yet.
    pub async fn cancel_pending(&self, entry_id: &EntryId) -> Result<QueueEntry> {
        let entry = self.inner.manager.lock().await.cancel(entry_id)?;
        self.refresh_state().await?;
        Ok(entry)
    }

    /// Run one submission pass: select due entries, submit them in parallel
    /// (bounded by the worker count), and record every outcome.
    ///
    /// Returns the number of entries whose attempt completed. Offline or
    /// auth-paused, this is a no-op.
    pub async fn process_due(&self) -> Result<usize> {
        if self.inner.tracker()?.snapshot().connection != ConnectionState::Online {
            return Ok(0);
        }

        let now = self.inner.clock.now_ms();
        let batch = self.inner.manager.lock().await.next_batch(now)?;
        if batch.is_empty() {
            self.refresh_state().await?;
            return Ok(0);
        }

        let mut submissions: JoinSet<(QueueEntry, Result<SubmitResponse>)> = JoinSet::new();
        for entry in batch {
            let inner = Arc::clone(&self.inner);
            submissions.spawn(async move {
                let attempt = inner.transport.submit(&entry.mutation);
                let result = match tokio::time::timeout(inner.config.submit_timeout, attempt).await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::TransientNetwork(format!(
                        "submission timed out after {:?}",
                        inner.config.submit_timeout
                    ))),
                };
                (entry, result)
            });
        }

        let mut processed = 0;
        while let Some(joined) = submissions.join_next().await {
            let Ok((entry, result)) = joined else {
                tracing::error!("Submission task aborted before completing");
                continue;
            };
            // Recording an outcome is best-effort: a storage failure on one
            // entry must not strand it in flight or abort the rest of the
            // pass. The entry goes back on the retry path instead.
            if let Err(err) = self.handle_outcome(&entry, result).await {
                let now = self.inner.clock.now_ms();
                let at = self
                    .inner
                    .manager
                    .lock()
                    .await
                    .requeue_after_storage_error(&entry, now);
                tracing::warn!(
                    entry_id = %entry.id,
                    error = %err,
                    retry_at = at,
                    "Failed to record submission outcome; retry scheduled"
                );
            }
            processed += 1;
        }

        if let Err(err) = self.refresh_state().await {
            tracing::warn!(error = %err, "Failed to refresh sync state after pass");
        }
        Ok(processed)
    }

    /// Resolve a pending conflict with an explicit non-manual strategy.
    pub async fn resolve_with_strategy(
        &self,
        conflict_id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> Result<Mutation> {
        let record = self.pending_record(conflict_id)?;
        let now = self.inner.clock.now_ms();

        let mutation = match self.inner.resolver.resolve(&record, Some(strategy), now) {
            Resolution::Resolved(mutation) => mutation,
            Resolution::NeedsManual => {
                return Err(Error::InvalidInput(
                    "manual strategy requires field choices; use resolve_manually".into(),
                ))
            }
        };

        self.finish_resolution(&record, mutation, ConflictStatus::ManuallyResolved, now)
            .await
    }

    /// Apply a user's field-by-field decision to a pending conflict.
    pub async fn resolve_manually(
        &self,
        conflict_id: &ConflictId,
        choices: &BTreeMap<String, FieldChoice>,
    ) -> Result<Mutation> {
        let record = self.pending_record(conflict_id)?;
        let now = self.inner.clock.now_ms();
        let mutation = self.inner.resolver.apply_manual(&record, choices, now)?;

        self.finish_resolution(&record, mutation, ConflictStatus::ManuallyResolved, now)
            .await
    }

    /// Abandon the local side of a pending conflict: the blocked entry is
    /// dropped and the remote value stands.
    pub async fn dismiss_conflict(&self, conflict_id: &ConflictId) -> Result<()> {
        let record = self
            .inner
            .conflicts
            .update_status(conflict_id, ConflictStatus::Dismissed)?;
        self.inner
            .manager
            .lock()
            .await
            .remove_blocked_entry(&record.entity_type, &record.entity_id)?;
        tracing::info!(conflict_id = %conflict_id, "Dismissed conflict; remote value stands");
        self.refresh_state().await?;
        Ok(())
    }

    /// Conflicts still awaiting a decision.
    pub fn pending_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.inner.conflicts.list_pending()
    }

    /// Full conflict history, oldest first (bounded by the configured cap).
    pub fn conflict_history(&self) -> Result<Vec<ConflictRecord>> {
        self.inner.conflicts.list()
    }

    /// All queue entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<QueueEntry>> {
        self.inner.manager.lock().await.entries()
    }

    /// Current sync state snapshot.
    pub fn sync_state(&self) -> Result<SyncState> {
        Ok(self.inner.tracker()?.snapshot())
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<EngineEvent>> {
        Ok(self.inner.tracker()?.subscribe())
    }

    /// Drive the engine until [`SyncEngine::shutdown`]: processes due work,
    /// then parks on a wakeup (new entry, connectivity, resolution) or the
    /// next scheduled retry instant.
    pub async fn run(&self) {
        while !self.inner.shutdown.load(Ordering::SeqCst) {
            match self.process_due().await {
                Ok(0) => {}
                Ok(count) => {
                    tracing::debug!(count, "Completed submission batch");
                    continue;
                }
                Err(err) => tracing::error!(error = %err, "Submission pass failed"),
            }

            let next_due = self.inner.manager.lock().await.next_due_at();
            match next_due {
                Some(at) => {
                    let now = self.inner.clock.now_ms();
                    let delay = Duration::from_millis(u64::try_from(at - now).unwrap_or(0));
                    tokio::select! {
                        () = self.inner.notify.notified() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => self.inner.notify.notified().await,
            }
        }
    }

    /// Stop [`SyncEngine::run`] after its current pass.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a runner mid-pass still wakes
        self.inner.notify.notify_one();
    }

    async fn handle_outcome(
        &self,
        entry: &QueueEntry,
        result: Result<SubmitResponse>,
    ) -> Result<()> {
        let now = self.inner.clock.now_ms();
        let mut manager = self.inner.manager.lock().await;

        match result {
            Ok(SubmitResponse::Ack { version }) => {
                tracing::debug!(entry_id = %entry.id, version, "Server applied mutation");
                manager.record_ack(entry)?;
                self.inner.tracker()?.note_acknowledged();
            }
            Ok(SubmitResponse::Conflict(remote)) => {
                match detect(&entry.mutation, &remote, now) {
                    Detection::AlreadyConsistent => {
                        // The remote already carries this edit; treat as applied
                        manager.record_ack(entry)?;
                        self.inner.tracker()?.note_acknowledged();
                    }
                    Detection::Diverged(record) => {
                        self.handle_divergence(&mut manager, entry, record, now)?;
                    }
                }
            }
            Err(Error::AuthExpired) => manager.record_auth_pause(entry)?,
            Err(Error::Validation(reason)) => {
                manager.record_validation_failure(entry, &reason)?;
            }
            // Anything else from the transport is retried; entries are
            // never dropped on an unclassified failure
            Err(err) => {
                manager.record_transient_failure(entry, &err.to_string(), now)?;
            }
        }
        Ok(())
    }

    fn handle_divergence(
        &self,
        manager: &mut QueueManager,
        entry: &QueueEntry,
        mut record: ConflictRecord,
        now: i64,
    ) -> Result<()> {
        match self.inner.resolver.resolve(&record, None, now) {
            Resolution::Resolved(mutation) => {
                // The merged mutation must be durable before the superseded
                // entry or the conflict record is touched; an error here
                // leaves the original entry intact for a later retry
                let outcome = manager.enqueue(mutation.clone(), now)?;
                manager.record_ack(entry)?;
                record.status = ConflictStatus::AutoResolved;
                self.inner.conflicts.insert(&record)?;
                if outcome == EnqueueOutcome::SupersededByDelete {
                    tracing::debug!(
                        conflict_id = %record.id,
                        "Resolved mutation dropped: a delete is queued for the entity"
                    );
                }
                tracing::info!(
                    conflict_id = %record.id,
                    entity = %entry.entity_key(),
                    "Auto-resolved conflict; merged mutation enqueued"
                );
                self.inner.emit(EngineEvent::ConflictDetected(record.clone()))?;
                self.inner
                    .emit(EngineEvent::ConflictResolved { record, mutation })?;
            }
            Resolution::NeedsManual => {
                self.inner.conflicts.insert(&record)?;
                manager.record_conflict_blocked(entry, "awaiting manual conflict resolution")?;
                tracing::info!(
                    conflict_id = %record.id,
                    entity = %entry.entity_key(),
                    "Conflict needs a manual decision; entity blocked"
                );
                self.inner.emit(EngineEvent::ConflictDetected(record))?;
            }
        }
        Ok(())
    }

    async fn finish_resolution(
        &self,
        record: &ConflictRecord,
        mutation: Mutation,
        status: ConflictStatus,
        now: i64,
    ) -> Result<Mutation> {
        // Enqueue the resolved mutation before settling anything. If this
        // fails the conflict stays pending and the blocked entry stays in
        // the queue, so the caller can simply retry the resolution.
        let mut manager = self.inner.manager.lock().await;
        let outcome = manager.enqueue(mutation.clone(), now)?;
        manager.remove_blocked_entry(&record.entity_type, &record.entity_id)?;
        drop(manager);

        let record = self.inner.conflicts.update_status(&record.id, status)?;

        if outcome == EnqueueOutcome::SupersededByDelete {
            tracing::debug!(
                conflict_id = %record.id,
                "Resolved mutation dropped: a delete is queued for the entity"
            );
        }
        self.inner.emit(EngineEvent::ConflictResolved {
            record,
            mutation: mutation.clone(),
        })?;
        self.refresh_state().await?;
        self.inner.notify.notify_one();
        Ok(mutation)
    }

    fn pending_record(&self, conflict_id: &ConflictId) -> Result<ConflictRecord> {
        let record = self
            .inner
            .conflicts
            .get(conflict_id)?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if !record.status.is_open() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} already settled ({:?})",
                record.status
            )));
        }
        Ok(record)
    }

    async fn refresh_state(&self) -> Result<()> {
        let (pending, failed) = self.inner.manager.lock().await.counts()?;
        let active: Vec<ConflictId> = self
            .inner
            .conflicts
            .list_pending()?
            .iter()
            .map(|record| record.id)
            .collect();
        let now = self.inner.clock.now_ms();
        self.inner
            .tracker()?
            .update_counts(pending, failed, active, now);
        Ok(())
    }
}
