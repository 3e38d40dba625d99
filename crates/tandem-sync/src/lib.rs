//! tandem-sync - Offline mutation queue and conflict resolution for Tandem
//!
//! This crate queues local edits while offline, submits them in order once
//! connectivity returns, and resolves the conflicts that concurrent edits by
//! other list members produce. Hosts drive it through [`SyncEngine`].

pub mod clock;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod queue;
pub mod store;
pub mod sync;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, MergePolicy};
pub use conflict::{FieldChoice, Resolution, ResolutionStrategy};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use events::EngineEvent;
pub use models::{
    ConflictId, ConflictRecord, ConflictStatus, ConnectionState, EntryId, EntryStatus, FieldMap,
    Mutation, MutationId, OperationKind, QueueEntry, SyncPhase, SyncState,
};
pub use queue::EnqueueOutcome;
pub use store::{KvStore, SqliteKvStore};
pub use transport::{RemoteState, SubmitResponse, Transport};
