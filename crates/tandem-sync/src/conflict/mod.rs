//! Conflict detection and resolution

mod detector;
mod merge;
mod resolver;

pub use detector::{detect, Detection};
pub use merge::{last_write_wins_payload, merge_payload, remote_payload, rule_for, FieldRule};
pub use resolver::{ConflictResolver, FieldChoice, Resolution, ResolutionStrategy};
