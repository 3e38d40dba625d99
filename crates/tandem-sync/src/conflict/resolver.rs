//! Conflict resolution strategies.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::config::MergePolicy;
use crate::error::{Error, Result};
use crate::models::{ConflictRecord, FieldMap, Mutation};

use super::merge;

/// How a conflict should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// The side with the greater timestamp wins entirely
    LastWriteWins,
    /// Per-field rules: done-wins, numeric max, text concatenation, LWW
    FieldMerge,
    /// Discard the remote side wholesale for this entity
    PreferLocal,
    /// Discard the local side wholesale for this entity
    PreferRemote,
    /// Defer to the host's user for a field-by-field decision
    Manual,
}

/// A user's per-field selection when resolving manually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChoice {
    /// Keep the local mutation's value
    Local,
    /// Keep the server's value
    Remote,
    /// Use an explicitly supplied value
    Value(Value),
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A brand-new mutation to re-enqueue; the conflict record is done
    Resolved(Mutation),
    /// Automatic resolution would destroy information; a human decides
    NeedsManual,
}

/// Applies a resolution strategy to a conflict record.
///
/// The resolver never mutates a record in place: output is always a new
/// update mutation based on the remote version observed at conflict time.
pub struct ConflictResolver {
    client_id: String,
    default_strategy: ResolutionStrategy,
    policy: MergePolicy,
    auto_resolve_threshold_ms: i64,
}

impl ConflictResolver {
    /// Build a resolver from the engine configuration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            default_strategy: config.default_strategy,
            policy: config.merge_policy.clone(),
            auto_resolve_threshold_ms: config.auto_resolve_threshold.as_millis() as i64,
        }
    }

    /// Resolve with the given strategy, or the configured default.
    ///
    /// Edits further apart than the auto-resolve threshold are treated as
    /// unrelated, non-competing changes and settled by last-write-wins even
    /// under the field-merge or manual strategies.
    #[must_use]
    pub fn resolve(
        &self,
        record: &ConflictRecord,
        strategy: Option<ResolutionStrategy>,
        now: i64,
    ) -> Resolution {
        let requested = strategy.unwrap_or(self.default_strategy);
        let effective = if self.outside_competing_window(record)
            && matches!(
                requested,
                ResolutionStrategy::FieldMerge | ResolutionStrategy::Manual
            ) {
            tracing::debug!(
                conflict_id = %record.id,
                "Edits far apart in time; auto-resolving by last-write-wins"
            );
            ResolutionStrategy::LastWriteWins
        } else {
            requested
        };

        let payload = match effective {
            ResolutionStrategy::LastWriteWins => merge::last_write_wins_payload(record),
            ResolutionStrategy::FieldMerge => merge::merge_payload(&self.policy, record),
            ResolutionStrategy::PreferLocal => record.local_value.clone(),
            ResolutionStrategy::PreferRemote => merge::remote_payload(record),
            ResolutionStrategy::Manual => return Resolution::NeedsManual,
        };

        Resolution::Resolved(self.build_mutation(record, payload, now))
    }

    /// Apply a user's field-by-field decision.
    ///
    /// Works like a field-level merge with explicit selections: chosen
    /// fields take the chosen side, unchosen fields follow the automatic
    /// per-field rules.
    pub fn apply_manual(
        &self,
        record: &ConflictRecord,
        choices: &BTreeMap<String, FieldChoice>,
        now: i64,
    ) -> Result<Mutation> {
        for field in choices.keys() {
            if !record.local_value.contains_key(field) {
                return Err(Error::InvalidInput(format!(
                    "choice for field {field} not part of the conflict"
                )));
            }
        }

        let mut payload = merge::merge_payload(&self.policy, record);
        for (field, choice) in choices {
            let value = match choice {
                FieldChoice::Local => record.local_value[field].clone(),
                FieldChoice::Remote => record
                    .remote_value
                    .get(field)
                    .cloned()
                    .unwrap_or(Value::Null),
                FieldChoice::Value(value) => value.clone(),
            };
            payload.insert(field.clone(), value);
        }

        Ok(self.build_mutation(record, payload, now))
    }

    fn outside_competing_window(&self, record: &ConflictRecord) -> bool {
        let gap = (record.local_timestamp - record.remote_timestamp).abs();
        gap > self.auto_resolve_threshold_ms
    }

    fn build_mutation(&self, record: &ConflictRecord, payload: FieldMap, now: i64) -> Mutation {
        Mutation::update(
            record.entity_type.clone(),
            record.entity_id.clone(),
            payload,
            record.remote_version,
            self.client_id.clone(),
            now,
        )
    }
}
