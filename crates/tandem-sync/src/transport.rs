//! Transport seam: the engine never opens connections itself.

use std::future::Future;

use crate::error::Result;
use crate::models::{FieldMap, Mutation};

/// The server's current view of an entity, returned alongside a conflict
/// response when the mutation's base version no longer matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteState {
    /// Current remote record
    pub value: FieldMap,
    /// Current remote version
    pub version: i64,
    /// When the remote record was last written (Unix ms)
    pub timestamp: i64,
    /// Client that produced the remote write, when the server reports it
    pub origin_client_id: Option<String>,
}

/// Outcome of a submission attempt that reached the server.
///
/// A conflict is not an error: it is a first-class outcome routed to the
/// conflict detector. Transient, validation, and auth failures travel as
/// [`crate::Error`] variants instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    /// The server applied the mutation and assigned a new entity version
    Ack { version: i64 },
    /// The base version no longer matches; here is the server's state
    Conflict(RemoteState),
}

/// External collaborator that delivers mutations to the server.
///
/// Implementations map their failure modes onto the engine's taxonomy:
/// network/server hiccups as [`crate::Error::TransientNetwork`], rejected
/// payloads as [`crate::Error::Validation`], expired credentials as
/// [`crate::Error::AuthExpired`].
pub trait Transport: Send + Sync {
    /// Submit one mutation built against `mutation.base_version`.
    fn submit(&self, mutation: &Mutation) -> impl Future<Output = Result<SubmitResponse>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conflict_is_not_an_error() {
        let remote = RemoteState {
            value: [("done".to_string(), json!(true))].into(),
            version: 3,
            timestamp: 9_000,
            origin_client_id: Some("client-b".into()),
        };
        let response = SubmitResponse::Conflict(remote.clone());
        assert_eq!(response, SubmitResponse::Conflict(remote));
    }
}
