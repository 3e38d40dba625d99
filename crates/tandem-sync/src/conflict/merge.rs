//! Per-field merge rules.
//!
//! All functions here are pure and deterministic over a fixed (local,
//! remote) pair, so replaying a resolution always produces the same merged
//! values.

use serde_json::Value;

use crate::config::MergePolicy;
use crate::models::{ConflictRecord, FieldMap};

/// Which merge rule applies to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// `true` wins over `false` regardless of timestamp
    PreferTrue,
    /// `max(local, remote)` for numeric quantities
    NumericMax,
    /// Divergent non-empty text is concatenated, never discarded
    ConcatText,
    /// Greater timestamp wins; client id breaks ties
    LastWriteWins,
}

/// Classify a field by the configured name sets.
#[must_use]
pub fn rule_for(policy: &MergePolicy, field: &str) -> FieldRule {
    if policy.prefer_true_fields.contains(field) {
        FieldRule::PreferTrue
    } else if policy.numeric_max_fields.contains(field) {
        FieldRule::NumericMax
    } else if policy.concat_text_fields.contains(field) {
        FieldRule::ConcatText
    } else {
        FieldRule::LastWriteWins
    }
}

/// Field-level merge over the mutation's touched fields.
///
/// Fields the remote record does not carry keep the local value; there is
/// no competing edit to merge against.
#[must_use]
pub fn merge_payload(policy: &MergePolicy, record: &ConflictRecord) -> FieldMap {
    record
        .local_value
        .iter()
        .map(|(field, local)| {
            let merged = match record.remote_value.get(field) {
                None => local.clone(),
                Some(remote) if remote == local => local.clone(),
                Some(remote) => merge_field(policy, record, field, local, remote),
            };
            (field.clone(), merged)
        })
        .collect()
}

/// Whole-record last-write-wins: one side wins entirely, not per field.
///
/// When the remote side wins, touched fields it no longer carries resolve
/// to `null` so both replicas converge on the remote record.
#[must_use]
pub fn last_write_wins_payload(record: &ConflictRecord) -> FieldMap {
    if local_wins(record) {
        record.local_value.clone()
    } else {
        remote_payload(record)
    }
}

/// The remote side's values for the touched fields (`null` where absent).
#[must_use]
pub fn remote_payload(record: &ConflictRecord) -> FieldMap {
    record
        .local_value
        .keys()
        .map(|field| {
            let value = record.remote_value.get(field).cloned().unwrap_or(Value::Null);
            (field.clone(), value)
        })
        .collect()
}

fn merge_field(
    policy: &MergePolicy,
    record: &ConflictRecord,
    field: &str,
    local: &Value,
    remote: &Value,
) -> Value {
    match rule_for(policy, field) {
        FieldRule::PreferTrue => match (local.as_bool(), remote.as_bool()) {
            (Some(l), Some(r)) => Value::Bool(l || r),
            _ => lww_value(record, local, remote),
        },
        FieldRule::NumericMax => match (local.as_f64(), remote.as_f64()) {
            (Some(l), Some(r)) => {
                if l >= r {
                    local.clone()
                } else {
                    remote.clone()
                }
            }
            _ => lww_value(record, local, remote),
        },
        FieldRule::ConcatText => match (local.as_str(), remote.as_str()) {
            (Some(l), Some(r)) if !l.is_empty() && !r.is_empty() && l != r => {
                Value::String(concat_text(policy, record, l, r))
            }
            _ => lww_value(record, local, remote),
        },
        FieldRule::LastWriteWins => lww_value(record, local, remote),
    }
}

/// Both texts are preserved, earlier edit first.
fn concat_text(policy: &MergePolicy, record: &ConflictRecord, local: &str, remote: &str) -> String {
    let (first, second) = if record.local_timestamp <= record.remote_timestamp {
        (local, remote)
    } else {
        (remote, local)
    };
    format!(
        "{first}{delim}{second} {note}",
        delim = policy.concat_delimiter,
        note = policy.concat_note
    )
}

fn lww_value(record: &ConflictRecord, local: &Value, remote: &Value) -> Value {
    if local_wins(record) {
        local.clone()
    } else {
        remote.clone()
    }
}

/// Timestamp comparison with a deterministic tie-break.
///
/// On equal timestamps the lexically greater client id wins; an unreported
/// remote client id concedes the tie to the server.
fn local_wins(record: &ConflictRecord) -> bool {
    if record.local_timestamp != record.remote_timestamp {
        return record.local_timestamp > record.remote_timestamp;
    }
    match &record.remote_origin_client_id {
        Some(remote_client) => record.origin_client_id > *remote_client,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictId, ConflictStatus, FieldDiff};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(local: FieldMap, remote: FieldMap, local_ts: i64, remote_ts: i64) -> ConflictRecord {
        let field_diffs = local
            .iter()
            .filter(|(field, value)| remote.get(*field) != Some(value))
            .map(|(field, value)| FieldDiff {
                field: field.clone(),
                local: Some(value.clone()),
                remote: remote.get(field).cloned(),
            })
            .collect();
        ConflictRecord {
            id: ConflictId::new(),
            entity_type: "list_item".into(),
            entity_id: "item-1".into(),
            local_value: local,
            remote_value: remote,
            local_timestamp: local_ts,
            remote_timestamp: remote_ts,
            remote_version: 9,
            origin_client_id: "client-a".into(),
            remote_origin_client_id: Some("client-b".into()),
            field_diffs,
            status: ConflictStatus::Pending,
            detected_at: remote_ts + 1,
        }
    }

    #[test]
    fn test_quantity_resolves_to_max() {
        // Local sets quantity=3, remote sets quantity=5
        let r = record(
            [("quantity".to_string(), json!(3))].into(),
            [("quantity".to_string(), json!(5))].into(),
            2_000,
            1_000, // local is newer, max still wins
        );
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["quantity"], json!(5));
    }

    #[test]
    fn test_done_true_wins_over_later_false() {
        // Local marks done=true, remote sets done=false with a later timestamp
        let r = record(
            [("done".to_string(), json!(true))].into(),
            [("done".to_string(), json!(false))].into(),
            1_000,
            2_000,
        );
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["done"], json!(true));
    }

    #[test]
    fn test_divergent_notes_concatenate_timestamp_ascending() {
        let policy = MergePolicy::default();

        // Local edit is earlier: local text comes first
        let r = record(
            [("note".to_string(), json!("buy 2%"))].into(),
            [("note".to_string(), json!("get skim"))].into(),
            1_000,
            2_000,
        );
        let merged = merge_payload(&policy, &r);
        assert_eq!(merged["note"], json!("buy 2% | get skim [both edits kept]"));

        // Remote edit is earlier: remote text comes first
        let r = record(
            [("note".to_string(), json!("buy 2%"))].into(),
            [("note".to_string(), json!("get skim"))].into(),
            3_000,
            2_000,
        );
        let merged = merge_payload(&policy, &r);
        assert_eq!(merged["note"], json!("get skim | buy 2% [both edits kept]"));
    }

    #[test]
    fn test_other_scalars_last_write_wins() {
        let r = record(
            [("name".to_string(), json!("milk"))].into(),
            [("name".to_string(), json!("oat milk"))].into(),
            1_000,
            2_000,
        );
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["name"], json!("oat milk"));

        let r = record(
            [("name".to_string(), json!("milk"))].into(),
            [("name".to_string(), json!("oat milk"))].into(),
            3_000,
            2_000,
        );
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["name"], json!("milk"));
    }

    #[test]
    fn test_timestamp_tie_breaks_on_client_id() {
        // client-a < client-b lexically, so the remote side wins the tie
        let r = record(
            [("name".to_string(), json!("milk"))].into(),
            [("name".to_string(), json!("oat milk"))].into(),
            2_000,
            2_000,
        );
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["name"], json!("oat milk"));

        let mut r = record(
            [("name".to_string(), json!("milk"))].into(),
            [("name".to_string(), json!("oat milk"))].into(),
            2_000,
            2_000,
        );
        r.origin_client_id = "client-z".into();
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["name"], json!("milk"));
    }

    #[test]
    fn test_field_absent_remotely_keeps_local_value() {
        let r = record(
            [("note".to_string(), json!("buy 2%"))].into(),
            FieldMap::new(),
            1_000,
            2_000,
        );
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["note"], json!("buy 2%"));
    }

    #[test]
    fn test_merge_is_deterministic_for_fixed_inputs() {
        let r = record(
            [
                ("done".to_string(), json!(false)),
                ("note".to_string(), json!("local note")),
                ("quantity".to_string(), json!(7)),
            ]
            .into(),
            [
                ("done".to_string(), json!(true)),
                ("note".to_string(), json!("remote note")),
                ("quantity".to_string(), json!(4)),
            ]
            .into(),
            5_000,
            1_000,
        );
        let policy = MergePolicy::default();
        let first = merge_payload(&policy, &r);
        let second = merge_payload(&policy, &r);
        assert_eq!(first, second);
        assert_eq!(first["done"], json!(true));
        assert_eq!(first["quantity"], json!(7));
    }

    #[test]
    fn test_whole_record_lww() {
        let r = record(
            [
                ("name".to_string(), json!("milk")),
                ("quantity".to_string(), json!(3)),
            ]
            .into(),
            [("name".to_string(), json!("oat milk"))].into(),
            1_000,
            2_000,
        );

        // Remote wins entirely; the touched field it lacks resolves to null
        let merged = last_write_wins_payload(&r);
        assert_eq!(merged["name"], json!("oat milk"));
        assert_eq!(merged["quantity"], Value::Null);

        let mut r = r;
        r.local_timestamp = 3_000;
        let merged = last_write_wins_payload(&r);
        assert_eq!(merged["name"], json!("milk"));
        assert_eq!(merged["quantity"], json!(3));
    }

    #[test]
    fn test_non_bool_done_falls_back_to_lww() {
        let r = record(
            [("done".to_string(), json!("yes"))].into(),
            [("done".to_string(), json!(false))].into(),
            3_000,
            2_000,
        );
        let merged = merge_payload(&MergePolicy::default(), &r);
        assert_eq!(merged["done"], json!("yes"));
    }
}
