//! Engine configuration.
//!
//! Every policy constant the merge and retry machinery relies on lives here
//! as a configurable default. The 5-minute unrelated-edits threshold and the
//! per-field merge rules in particular are product policy, not protocol, so
//! hosts can override them.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::conflict::ResolutionStrategy;

/// Classifies fields by name so the field-level merge knows which rule to
/// apply. Defaults cover the common shared-list field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    /// Boolean fields where `true` wins regardless of timestamp
    /// (an item another user checked off must stay checked off)
    pub prefer_true_fields: BTreeSet<String>,
    /// Numeric fields resolved to `max(local, remote)`
    pub numeric_max_fields: BTreeSet<String>,
    /// Free-text fields where divergent edits are concatenated instead of
    /// one side being discarded
    pub concat_text_fields: BTreeSet<String>,
    /// Separator placed between the two preserved text values
    pub concat_delimiter: String,
    /// Marker appended so readers can tell both edits were kept
    pub concat_note: String,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            prefer_true_fields: ["done", "completed"]
                .into_iter()
                .map(String::from)
                .collect(),
            numeric_max_fields: ["quantity", "qty", "count"]
                .into_iter()
                .map(String::from)
                .collect(),
            concat_text_fields: ["note", "notes", "description"]
                .into_iter()
                .map(String::from)
                .collect(),
            concat_delimiter: " | ".into(),
            concat_note: "[both edits kept]".into(),
        }
    }
}

/// Tunable parameters for the sync engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identifier of this client, stamped on resolution-derived mutations
    pub client_id: String,
    /// First retry delay after a transient failure
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff
    pub max_backoff: Duration,
    /// Convert persistent transient failure into terminal `Failed` after
    /// this many attempts; `None` retries indefinitely
    pub max_attempts: Option<u32>,
    /// Concurrent submissions across distinct entities
    pub worker_count: usize,
    /// Bounded wait for each submission attempt; exceeding it counts as a
    /// transient error
    pub submit_timeout: Duration,
    /// Edits further apart than this are treated as unrelated and resolved
    /// by last-write-wins instead of being escalated
    pub auto_resolve_threshold: Duration,
    /// Retained conflict records before oldest-resolved eviction
    pub conflict_history_cap: usize,
    /// Strategy applied when a conflict arrives without an explicit choice
    pub default_strategy: ResolutionStrategy,
    /// Field classification for the field-level merge
    pub merge_policy: MergePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_id: "local".into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_attempts: None,
            worker_count: 4,
            submit_timeout: Duration::from_secs(30),
            auto_resolve_threshold: Duration::from_secs(5 * 60),
            conflict_history_cap: 200,
            default_strategy: ResolutionStrategy::FieldMerge,
            merge_policy: MergePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Config with the given client identifier and default policies.
    #[must_use]
    pub fn for_client(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}
