//! Sync state tracker: a single owned state machine, observed through
//! snapshots and a typed broadcast channel instead of ambient globals or
//! callback registration.

use tokio::sync::broadcast;

use crate::events::EngineEvent;
use crate::models::{ConflictId, ConnectionState, SyncPhase, SyncState};

/// Owns the process-wide [`SyncState`].
///
/// Only the queue manager and conflict resolver paths write to it (via the
/// engine); hosts read snapshots and subscribe to change events. Dropping
/// the tracker closes the channel, detaching every subscriber.
pub struct SyncTracker {
    state: SyncState,
    events: broadcast::Sender<EngineEvent>,
    acked_since_drain: bool,
}

impl SyncTracker {
    /// Create a tracker with the given event buffer capacity.
    #[must_use]
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: SyncState::default(),
            events,
            acked_since_drain: false,
        }
    }

    /// Record that the server applied a submission. Distinguishes a queue
    /// that drained through acknowledgments from one that was merely
    /// cancelled or dismissed empty.
    pub fn note_acknowledged(&mut self) {
        self.acked_since_drain = true;
    }

    /// Subscribe to engine events. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        self.state.clone()
    }

    /// Record a connectivity notification from the transport collaborator.
    ///
    /// Returns true when this transition re-entered `Online`, which is the
    /// signal to resume processing from the oldest pending entry.
    pub fn set_connection(&mut self, connection: ConnectionState) -> bool {
        if self.state.connection == connection {
            return false;
        }
        let came_online = connection == ConnectionState::Online;
        tracing::info!(?connection, "Connectivity changed");
        self.state.connection = connection;
        self.publish_state();
        came_online
    }

    /// Recompute phase and counts after queue or conflict activity.
    pub fn update_counts(
        &mut self,
        pending_count: usize,
        failed_count: usize,
        active_conflicts: Vec<ConflictId>,
        now: i64,
    ) {
        let phase = self.next_phase(pending_count, failed_count, &active_conflicts);
        let changed = self.state.pending_count != pending_count
            || self.state.failed_count != failed_count
            || self.state.active_conflicts != active_conflicts
            || self.state.phase != phase;
        if !changed {
            return;
        }

        if phase == SyncPhase::Synced && self.acked_since_drain {
            self.state.last_sync_at = Some(now);
            self.acked_since_drain = false;
        }
        self.state.pending_count = pending_count;
        self.state.failed_count = failed_count;
        self.state.active_conflicts = active_conflicts;
        self.state.phase = phase;
        self.publish_state();
    }

    /// Publish an event to subscribers. No subscribers is fine.
    pub fn emit(&self, event: EngineEvent) {
        self.events.send(event).ok();
    }

    /// No phase is terminal: `failed` falls back to `syncing` once the
    /// offending entry is resolved or removed. An empty healthy queue
    /// settles in `synced` only after something was acknowledged; a queue
    /// drained by cancellation alone returns to `idle`.
    fn next_phase(
        &self,
        pending_count: usize,
        failed_count: usize,
        active_conflicts: &[ConflictId],
    ) -> SyncPhase {
        if failed_count > 0 || !active_conflicts.is_empty() {
            SyncPhase::Failed
        } else if pending_count > 0 {
            SyncPhase::Syncing
        } else if self.acked_since_drain || self.state.last_sync_at.is_some() {
            SyncPhase::Synced
        } else {
            SyncPhase::Idle
        }
    }

    fn publish_state(&self) {
        self.emit(EngineEvent::SyncStateChanged(self.state.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let tracker = SyncTracker::new(16);
        let state = tracker.snapshot();
        assert_eq!(state.connection, ConnectionState::Offline);
        assert_eq!(state.phase, SyncPhase::Idle);
    }

    #[test]
    fn test_connection_transitions() {
        let mut tracker = SyncTracker::new(16);
        assert!(!tracker.set_connection(ConnectionState::Connecting));
        assert!(tracker.set_connection(ConnectionState::Online));
        // Repeated notification is a no-op
        assert!(!tracker.set_connection(ConnectionState::Online));

        assert!(!tracker.set_connection(ConnectionState::Offline));
        assert!(tracker.set_connection(ConnectionState::Online));
    }

    #[test]
    fn test_phase_lifecycle() {
        let mut tracker = SyncTracker::new(16);

        tracker.update_counts(2, 0, Vec::new(), 1_000);
        assert_eq!(tracker.snapshot().phase, SyncPhase::Syncing);

        tracker.note_acknowledged();
        tracker.update_counts(0, 0, Vec::new(), 2_000);
        let state = tracker.snapshot();
        assert_eq!(state.phase, SyncPhase::Synced);
        assert_eq!(state.last_sync_at, Some(2_000));
    }

    #[test]
    fn test_failed_is_not_terminal() {
        let mut tracker = SyncTracker::new(16);
        tracker.update_counts(1, 1, Vec::new(), 1_000);
        assert_eq!(tracker.snapshot().phase, SyncPhase::Failed);

        // Offending entry removed; pending work resumes
        tracker.update_counts(1, 0, Vec::new(), 2_000);
        assert_eq!(tracker.snapshot().phase, SyncPhase::Syncing);

        tracker.note_acknowledged();
        tracker.update_counts(0, 0, Vec::new(), 3_000);
        assert_eq!(tracker.snapshot().phase, SyncPhase::Synced);
    }

    #[test]
    fn test_blocked_conflict_fails_phase() {
        let mut tracker = SyncTracker::new(16);
        let conflict = ConflictId::new();
        tracker.update_counts(0, 0, vec![conflict], 1_000);

        let state = tracker.snapshot();
        assert_eq!(state.phase, SyncPhase::Failed);
        assert_eq!(state.active_conflicts, vec![conflict]);
    }

    #[test]
    fn test_drain_without_ack_returns_to_idle() {
        let mut tracker = SyncTracker::new(16);
        tracker.update_counts(1, 0, Vec::new(), 1_000);
        assert_eq!(tracker.snapshot().phase, SyncPhase::Syncing);

        // The only entry was cancelled; nothing ever reached the server
        tracker.update_counts(0, 0, Vec::new(), 2_000);
        let state = tracker.snapshot();
        assert_eq!(state.phase, SyncPhase::Idle);
        assert_eq!(state.last_sync_at, None);

        // A real acknowledgment still settles in synced afterwards
        tracker.update_counts(1, 0, Vec::new(), 3_000);
        tracker.note_acknowledged();
        tracker.update_counts(0, 0, Vec::new(), 4_000);
        let state = tracker.snapshot();
        assert_eq!(state.phase, SyncPhase::Synced);
        assert_eq!(state.last_sync_at, Some(4_000));
    }

    #[test]
    fn test_idle_until_first_work() {
        let mut tracker = SyncTracker::new(16);
        tracker.update_counts(0, 0, Vec::new(), 1_000);
        assert_eq!(tracker.snapshot().phase, SyncPhase::Idle);
        assert_eq!(tracker.snapshot().last_sync_at, None);
    }

    #[test]
    fn test_events_published_on_change() {
        let mut tracker = SyncTracker::new(16);
        let mut rx = tracker.subscribe();

        tracker.update_counts(1, 0, Vec::new(), 1_000);
        let event = rx.try_recv().unwrap();
        match event {
            EngineEvent::SyncStateChanged(state) => {
                assert_eq!(state.pending_count, 1);
                assert_eq!(state.phase, SyncPhase::Syncing);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Identical counts publish nothing
        tracker.update_counts(1, 0, Vec::new(), 1_500);
        assert!(rx.try_recv().is_err());
    }
}
