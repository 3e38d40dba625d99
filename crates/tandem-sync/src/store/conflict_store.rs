//! Conflict history store: capped, oldest-resolved-evicted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{ConflictId, ConflictRecord, ConflictStatus};

use super::kv::KvStore;

const CONFLICT_NAMESPACE: &str = "conflicts";

/// Versioned on-disk envelope for a conflict record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
enum PersistedConflict {
    #[serde(rename = "1")]
    V1 { record: ConflictRecord },
}

impl PersistedConflict {
    fn current(record: &ConflictRecord) -> Self {
        Self::V1 {
            record: record.clone(),
        }
    }

    fn into_current(self) -> ConflictRecord {
        match self {
            Self::V1 { record } => record,
        }
    }
}

/// Persists conflict records for resolution and user-visible history.
///
/// Retention is capped; once over the cap the oldest records whose status
/// has left `Pending` are evicted. Pending records are never evicted.
#[derive(Clone)]
pub struct ConflictStore {
    kv: Arc<dyn KvStore>,
    history_cap: usize,
}

impl ConflictStore {
    /// Create a conflict store over the given substrate.
    pub fn new(kv: Arc<dyn KvStore>, history_cap: usize) -> Self {
        Self { kv, history_cap }
    }

    /// Persist a new record and evict history beyond the cap.
    pub fn insert(&self, record: &ConflictRecord) -> Result<()> {
        self.write(record)?;
        self.evict_over_cap()
    }

    /// Fetch one record by id.
    pub fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let Some(document) = self.kv.get(CONFLICT_NAMESPACE, &id.as_str())? else {
            return Ok(None);
        };
        Ok(Some(decode(&document)?))
    }

    /// All retained records, oldest first.
    pub fn list(&self) -> Result<Vec<ConflictRecord>> {
        self.kv
            .list(CONFLICT_NAMESPACE)?
            .into_iter()
            .map(|(_, document)| decode(&document))
            .collect()
    }

    /// Records still awaiting resolution, oldest first.
    pub fn list_pending(&self) -> Result<Vec<ConflictRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.status == ConflictStatus::Pending)
            .collect())
    }

    /// Move a record out of `Pending`.
    ///
    /// Records are immutable once resolved; transitioning a non-pending
    /// record is rejected.
    pub fn update_status(&self, id: &ConflictId, status: ConflictStatus) -> Result<ConflictRecord> {
        let mut record = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;

        if !record.status.is_open() {
            return Err(Error::InvalidInput(format!(
                "conflict {id} already resolved ({:?})",
                record.status
            )));
        }

        record.status = status;
        self.write(&record)?;
        Ok(record)
    }

    fn write(&self, record: &ConflictRecord) -> Result<()> {
        let document = serde_json::to_string(&PersistedConflict::current(record))?;
        self.kv
            .put(CONFLICT_NAMESPACE, &record.id.as_str(), &document)
    }

    fn evict_over_cap(&self) -> Result<()> {
        let records = self.list()?;
        if records.len() <= self.history_cap {
            return Ok(());
        }

        let mut to_evict = records.len() - self.history_cap;
        for record in &records {
            if to_evict == 0 {
                break;
            }
            if record.status.is_open() {
                continue;
            }
            self.kv.delete(CONFLICT_NAMESPACE, &record.id.as_str())?;
            tracing::debug!(conflict_id = %record.id, "Evicted resolved conflict from history");
            to_evict -= 1;
        }

        Ok(())
    }
}

fn decode(document: &str) -> Result<ConflictRecord> {
    let persisted: PersistedConflict = serde_json::from_str(document)?;
    Ok(persisted.into_current())
}
