//! Conflict detection: decides whether a rejected submission actually
//! diverged from the remote record.

use crate::models::{ConflictId, ConflictRecord, ConflictStatus, FieldDiff, Mutation};
use crate::transport::RemoteState;

/// What the detector concluded about a conflict response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// The remote record already equals the mutation's intended result for
    /// every touched field; the submission can be treated as acknowledged.
    AlreadyConsistent,
    /// At least one touched field materially differs.
    Diverged(ConflictRecord),
}

/// Compare a mutation's intended payload against the remote record returned
/// with a conflict response.
///
/// Only fields present in the mutation's payload are compared: fields the
/// user did not touch are never flagged as conflicting, even if the remote
/// side changed them.
#[must_use]
pub fn detect(mutation: &Mutation, remote: &RemoteState, detected_at: i64) -> Detection {
    let field_diffs: Vec<FieldDiff> = mutation
        .payload
        .iter()
        .filter_map(|(field, local_value)| {
            let remote_value = remote.value.get(field);
            if remote_value == Some(local_value) {
                return None;
            }
            Some(FieldDiff {
                field: field.clone(),
                local: Some(local_value.clone()),
                remote: remote_value.cloned(),
            })
        })
        .collect();

    if field_diffs.is_empty() {
        tracing::debug!(
            entity = %mutation.entity_key(),
            "Conflict response carries no material divergence; treating as acknowledged"
        );
        return Detection::AlreadyConsistent;
    }

    tracing::info!(
        entity = %mutation.entity_key(),
        fields = field_diffs.len(),
        "Detected conflicting edit"
    );

    Detection::Diverged(ConflictRecord {
        id: ConflictId::new(),
        entity_type: mutation.entity_type.clone(),
        entity_id: mutation.entity_id.clone(),
        local_value: mutation.payload.clone(),
        remote_value: remote.value.clone(),
        local_timestamp: mutation.client_timestamp,
        remote_timestamp: remote.timestamp,
        remote_version: remote.version,
        origin_client_id: mutation.origin_client_id.clone(),
        remote_origin_client_id: remote.origin_client_id.clone(),
        field_diffs,
        status: ConflictStatus::Pending,
        detected_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMap;
    use serde_json::json;

    fn mutation(payload: FieldMap) -> Mutation {
        Mutation::update("list_item", "item-1", payload, 4, "client-a", 1_000)
    }

    fn remote(value: FieldMap) -> RemoteState {
        RemoteState {
            value,
            version: 7,
            timestamp: 2_000,
            origin_client_id: Some("client-b".into()),
        }
    }

    #[test]
    fn test_untouched_remote_fields_never_conflict() {
        // Remote changed "name", but the local edit only touched "quantity"
        let m = mutation([("quantity".to_string(), json!(3))].into());
        let r = remote(
            [
                ("quantity".to_string(), json!(5)),
                ("name".to_string(), json!("oat milk")),
            ]
            .into(),
        );

        let Detection::Diverged(record) = detect(&m, &r, 3_000) else {
            panic!("expected divergence");
        };
        assert_eq!(record.conflicting_fields(), vec!["quantity"]);
    }

    #[test]
    fn test_already_consistent_when_remote_matches_intent() {
        let m = mutation([("done".to_string(), json!(true))].into());
        let r = remote(
            [
                ("done".to_string(), json!(true)),
                ("name".to_string(), json!("renamed elsewhere")),
            ]
            .into(),
        );

        assert_eq!(detect(&m, &r, 3_000), Detection::AlreadyConsistent);
    }

    #[test]
    fn test_field_missing_remotely_counts_as_divergent() {
        let m = mutation([("note".to_string(), json!("buy 2%"))].into());
        let r = remote([("name".to_string(), json!("milk"))].into());

        let Detection::Diverged(record) = detect(&m, &r, 3_000) else {
            panic!("expected divergence");
        };
        assert_eq!(record.field_diffs[0].remote, None);
        assert_eq!(record.field_diffs[0].local, Some(json!("buy 2%")));
    }

    #[test]
    fn test_record_captures_remote_version_and_timestamps() {
        let m = mutation([("quantity".to_string(), json!(3))].into());
        let r = remote([("quantity".to_string(), json!(5))].into());

        let Detection::Diverged(record) = detect(&m, &r, 3_000) else {
            panic!("expected divergence");
        };
        assert_eq!(record.remote_version, 7);
        assert_eq!(record.local_timestamp, 1_000);
        assert_eq!(record.remote_timestamp, 2_000);
        assert_eq!(record.detected_at, 3_000);
        assert_eq!(record.status, ConflictStatus::Pending);
    }

    #[test]
    fn test_delete_mutation_with_empty_payload_is_consistent() {
        // A delete carries no payload, so there is nothing to compare;
        // the server's tombstone semantics govern.
        let m = Mutation::delete("list_item", "item-1", 4, "client-a", 1_000);
        let r = remote([("name".to_string(), json!("milk"))].into());
        assert_eq!(detect(&m, &r, 3_000), Detection::AlreadyConsistent);
    }
}
