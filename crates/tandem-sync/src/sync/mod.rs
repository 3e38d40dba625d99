//! Sync state machine and event publication.

mod tracker;

pub use tracker::SyncTracker;
