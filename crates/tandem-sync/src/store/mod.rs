//! Durable storage layer for the sync engine

mod conflict_store;
mod kv;
mod migrations;
mod queue_store;

pub use conflict_store::ConflictStore;
pub use kv::{KvStore, SqliteKvStore};
pub use queue_store::{EntryPatch, QueueStore};
