//! Mutation model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ordered map of field name to JSON value.
///
/// A partial map for updates (only the touched fields), the full record for
/// creates, empty for deletes. `BTreeMap` keeps iteration order deterministic
/// so merge results never depend on insertion order.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// A unique identifier for a mutation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Create a new unique mutation ID using UUID v7
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

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The kind of change a mutation carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Cross-entity submission priority class: delete > update > create.
    ///
    /// Lower is submitted first. Deletes go out ahead of everything else to
    /// minimize edit-after-delete races.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Delete => 0,
            Self::Update => 1,
            Self::Create => 2,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{name}")
    }
}

/// One intended change to one entity, queued for delivery.
///
/// Immutable once built; a conflict resolution never edits a mutation in
/// place, it produces a brand-new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Unique, client-generated identifier
    pub id: MutationId,
    /// Entity kind, e.g. "list_item"
    pub entity_type: String,
    /// Identifier of the entity this mutation targets
    pub entity_id: String,
    /// What kind of change this is
    pub op: OperationKind,
    /// Touched fields (partial for update, full record for create, empty for delete)
    pub payload: FieldMap,
    /// Version of the entity this mutation assumes as its starting point
    pub base_version: i64,
    /// When the edit was made on the client (Unix ms)
    pub client_timestamp: i64,
    /// Which client produced the edit
    pub origin_client_id: String,
}

impl Mutation {
    /// Create-mutation carrying the full record for a new entity.
    #[must_use]
    pub fn create(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: FieldMap,
        origin_client_id: impl Into<String>,
        client_timestamp: i64,
    ) -> Self {
        Self {
            id: MutationId::new(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            op: OperationKind::Create,
            payload,
            base_version: 0,
            client_timestamp,
            origin_client_id: origin_client_id.into(),
        }
    }

    /// Update-mutation carrying only the touched fields.
    #[must_use]
    pub fn update(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: FieldMap,
        base_version: i64,
        origin_client_id: impl Into<String>,
        client_timestamp: i64,
    ) -> Self {
        Self {
            id: MutationId::new(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            op: OperationKind::Update,
            payload,
            base_version,
            client_timestamp,
            origin_client_id: origin_client_id.into(),
        }
    }

    /// Delete-mutation; carries no payload.
    #[must_use]
    pub fn delete(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        base_version: i64,
        origin_client_id: impl Into<String>,
        client_timestamp: i64,
    ) -> Self {
        Self {
            id: MutationId::new(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            op: OperationKind::Delete,
            payload: FieldMap::new(),
            base_version,
            client_timestamp,
            origin_client_id: origin_client_id.into(),
        }
    }

    /// Key identifying the entity this mutation targets.
    ///
    /// Queue ordering and the single-in-flight guard are scoped to this key.
    #[must_use]
    pub fn entity_key(&self) -> String {
        format!("{}/{}", self.entity_type, self.entity_id)
    }

    /// Check the mutation is well-formed before it enters the queue.
    pub fn validate(&self) -> crate::Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(crate::Error::Validation("entity_type is empty".into()));
        }
        if self.entity_id.trim().is_empty() {
            return Err(crate::Error::Validation("entity_id is empty".into()));
        }
        match self.op {
            OperationKind::Create | OperationKind::Update if self.payload.is_empty() => Err(
                crate::Error::Validation(format!("{} mutation with empty payload", self.op)),
            ),
            OperationKind::Delete if !self.payload.is_empty() => Err(crate::Error::Validation(
                "delete mutation must not carry a payload".into(),
            )),
            _ => Ok(()),
        }
    }
}
