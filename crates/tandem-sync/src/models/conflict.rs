//! Conflict record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::FieldMap;

/// A unique identifier for a conflict record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Resolution state of a conflict record.
///
/// A record is mutable only while `Pending`; every other status is final and
/// kept for user-visible history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    AutoResolved,
    ManuallyResolved,
    Dismissed,
}

impl ConflictStatus {
    /// Whether the record may still transition to another status.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Local vs. remote value for one field that differs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Field name
    pub field: String,
    /// Value the local mutation intended (None if the field is absent locally)
    pub local: Option<serde_json::Value>,
    /// Value the remote record currently holds (None if absent remotely)
    pub remote: Option<serde_json::Value>,
}

/// Captured divergence between a local mutation's intent and the remote
/// entity's current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique identifier of this record
    pub id: ConflictId,
    /// Entity kind involved in the conflict
    pub entity_type: String,
    /// Entity involved in the conflict
    pub entity_id: String,
    /// The mutation's intended result (its touched fields)
    pub local_value: FieldMap,
    /// The server's current record
    pub remote_value: FieldMap,
    /// When the local edit was made (Unix ms)
    pub local_timestamp: i64,
    /// When the remote edit was made (Unix ms)
    pub remote_timestamp: i64,
    /// Remote version observed at conflict time; resolutions base on this
    pub remote_version: i64,
    /// Client that produced the local edit
    pub origin_client_id: String,
    /// Client that produced the remote write, when the server reports it
    pub remote_origin_client_id: Option<String>,
    /// Per-field local vs. remote values for fields that differ
    pub field_diffs: Vec<FieldDiff>,
    /// Resolution state
    pub status: ConflictStatus,
    /// When the detector built this record (Unix ms)
    pub detected_at: i64,
}

impl ConflictRecord {
    /// Names of the fields that diverged.
    #[must_use]
    pub fn conflicting_fields(&self) -> Vec<&str> {
        self.field_diffs.iter().map(|d| d.field.as_str()).collect()
    }
}
