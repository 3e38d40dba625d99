//! Data models for the sync engine

mod conflict;
mod mutation;
mod queue_entry;
mod sync_state;

pub use conflict::{ConflictId, ConflictRecord, ConflictStatus, FieldDiff};
pub use mutation::{FieldMap, Mutation, MutationId, OperationKind};
pub use queue_entry::{EntryId, EntryStatus, QueueEntry};
pub use sync_state::{ConnectionState, SyncPhase, SyncState};
