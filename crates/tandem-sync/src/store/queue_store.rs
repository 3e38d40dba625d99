//! Durable queue store: persists pending mutations across process restarts.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{EntryId, EntryStatus, Mutation, QueueEntry};

use super::kv::KvStore;

const QUEUE_NAMESPACE: &str = "queue";

/// Versioned on-disk envelope for a queue entry.
///
/// Tagged by `schema_version` so outdated or malformed documents fail loudly
/// at load time instead of propagating corrupt state. New versions get a new
/// variant plus an upgrade arm in [`PersistedEntry::into_current`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
enum PersistedEntry {
    #[serde(rename = "1")]
    V1 { entry: QueueEntry },
}

impl PersistedEntry {
    fn current(entry: &QueueEntry) -> Self {
        Self::V1 {
            entry: entry.clone(),
        }
    }

    fn into_current(self) -> QueueEntry {
        match self {
            Self::V1 { entry } => entry,
        }
    }
}

/// Fields of a queue entry the manager may change after enqueue.
///
/// `last_error` is double-optional: the outer `Option` means "leave as is",
/// the inner one is the new value (including clearing it with `None`).
#[derive(Debug, Default, Clone)]
pub struct EntryPatch {
    pub status: Option<EntryStatus>,
    pub attempt_count: Option<u32>,
    pub next_attempt_at: Option<i64>,
    pub last_error: Option<Option<String>>,
}

impl EntryPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: EntryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }

    #[must_use]
    pub fn with_next_attempt_at(mut self, at: i64) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }
}

/// Append/read/remove primitives for queue entries over the key-value
/// substrate. Entries reload in their original insertion order.
#[derive(Clone)]
pub struct QueueStore {
    kv: Arc<dyn KvStore>,
}

impl QueueStore {
    /// Create a queue store over the given substrate.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Persist a mutation as a new pending entry.
    pub fn append(&self, mutation: Mutation, enqueued_at: i64) -> Result<QueueEntry> {
        let entry = QueueEntry::new(mutation, enqueued_at);
        self.write(&entry)?;
        Ok(entry)
    }

    /// Fetch one entry by id.
    pub fn get(&self, id: &EntryId) -> Result<Option<QueueEntry>> {
        let Some(document) = self.kv.get(QUEUE_NAMESPACE, &id.as_str())? else {
            return Ok(None);
        };
        Ok(Some(decode(&document)?))
    }

    /// All non-removed entries in their original insertion order.
    pub fn list(&self) -> Result<Vec<QueueEntry>> {
        self.kv
            .list(QUEUE_NAMESPACE)?
            .into_iter()
            .map(|(_, document)| decode(&document))
            .collect()
    }

    /// Apply a patch to an entry and return the updated entry.
    pub fn update(&self, id: &EntryId, patch: &EntryPatch) -> Result<QueueEntry> {
        let mut entry = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("queue entry {id}")))?;

        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(attempt_count) = patch.attempt_count {
            entry.attempt_count = attempt_count;
        }
        if let Some(next_attempt_at) = patch.next_attempt_at {
            entry.next_attempt_at = next_attempt_at;
        }
        if let Some(ref last_error) = patch.last_error {
            entry.last_error = last_error.clone();
        }

        self.write(&entry)?;
        Ok(entry)
    }

    /// Remove an acknowledged, cancelled, or superseded entry.
    pub fn remove(&self, id: &EntryId) -> Result<()> {
        self.kv.delete(QUEUE_NAMESPACE, &id.as_str())
    }

    fn write(&self, entry: &QueueEntry) -> Result<()> {
        let document = serde_json::to_string(&PersistedEntry::current(entry))?;
        self.kv.put(QUEUE_NAMESPACE, &entry.id.as_str(), &document)
    }
}

fn decode(document: &str) -> Result<QueueEntry> {
    let persisted: PersistedEntry = serde_json::from_str(document)?;
    Ok(persisted.into_current())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldMap, OperationKind};
    use crate::store::SqliteKvStore;
    use serde_json::json;

    fn setup() -> QueueStore {
        QueueStore::new(Arc::new(SqliteKvStore::open_in_memory().unwrap()))
    }

    fn mutation(entity_id: &str) -> Mutation {
        let payload: FieldMap = [("name".to_string(), json!("milk"))].into();
        Mutation::update("list_item", entity_id, payload, 1, "client-a", 1_000)
    }

    #[test]
    fn test_append_and_get() {
        let store = setup();
        let entry = store.append(mutation("item-1"), 2_000).unwrap();

        let fetched = store.get(&entry.id).unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert_eq!(fetched.status, EntryStatus::Pending);
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let store = setup();
        let a = store.append(mutation("item-a"), 1_000).unwrap();
        let b = store.append(mutation("item-b"), 1_001).unwrap();
        let c = store.append(mutation("item-c"), 1_002).unwrap();

        let ids: Vec<EntryId> = store.list().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_update_patch() {
        let store = setup();
        let entry = store.append(mutation("item-1"), 1_000).unwrap();

        let updated = store
            .update(
                &entry.id,
                &EntryPatch::status(EntryStatus::RetryScheduled)
                    .with_attempts(2)
                    .with_next_attempt_at(5_000)
                    .with_last_error(Some("connection reset".into())),
            )
            .unwrap();

        assert_eq!(updated.status, EntryStatus::RetryScheduled);
        assert_eq!(updated.attempt_count, 2);
        assert_eq!(updated.next_attempt_at, 5_000);
        assert_eq!(updated.last_error.as_deref(), Some("connection reset"));

        // Unmentioned fields are untouched
        assert_eq!(updated.mutation, entry.mutation);
        assert_eq!(updated.enqueued_at, entry.enqueued_at);
    }

    #[test]
    fn test_update_missing_entry() {
        let store = setup();
        let err = store
            .update(&EntryId::new(), &EntryPatch::status(EntryStatus::Failed))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_remove() {
        let store = setup();
        let entry = store.append(mutation("item-1"), 1_000).unwrap();

        store.remove(&entry.id).unwrap();
        assert!(store.get(&entry.id).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_reload_across_restart() {
        use tempfile::tempdir;
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("queue.db");

        let entry_id;
        {
            let kv = Arc::new(SqliteKvStore::open(&path).unwrap());
            let store = QueueStore::new(kv);
            entry_id = store.append(mutation("item-1"), 1_000).unwrap().id;
            store.append(mutation("item-2"), 1_001).unwrap();
        }

        let kv = Arc::new(SqliteKvStore::open(&path).unwrap());
        let store = QueueStore::new(kv);
        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, entry_id);
        assert_eq!(entries[0].mutation.op, OperationKind::Update);
    }

    #[test]
    fn test_unknown_schema_version_fails_loudly() {
        let kv = Arc::new(SqliteKvStore::open_in_memory().unwrap());
        kv.put("queue", "bogus", r#"{"schema_version":"99","entry":{}}"#)
            .unwrap();

        let store = QueueStore::new(kv);
        assert!(matches!(
            store.list().unwrap_err(),
            Error::Serialization(_)
        ));
    }

    #[test]
    fn test_malformed_document_fails_loudly() {
        let kv = Arc::new(SqliteKvStore::open_in_memory().unwrap());
        kv.put("queue", "bogus", "not json").unwrap();

        let store = QueueStore::new(kv);
        assert!(store.list().is_err());
    }
}
