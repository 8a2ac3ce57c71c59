//! Errors surfaced by the service layer.

use serde_json::{json, Value};
use strata_graph::{QueryError, RepositoryId, SnapshotId, StoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Unknown repository, node, or no sealed snapshot yet.
    #[error("{0}")]
    NotFound(String),

    #[error("repository {repository} already has job {snapshot_id} in progress")]
    AlreadyRunning {
        repository: RepositoryId,
        snapshot_id: SnapshotId,
    },

    #[error("{0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// HTTP-style status code, also used as the JSON-RPC error code.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyRunning { .. } => 409,
            Self::Validation(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Structured detail for the JSON-RPC `data` field.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::AlreadyRunning { snapshot_id, .. } => Some(json!({ "snapshotId": snapshot_id })),
            _ => None,
        }
    }
}

impl From<QueryError> for ServiceError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NoSnapshot(_) | QueryError::NodeNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            QueryError::Validation(message) => Self::Validation(message),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownSnapshot(_) => Self::NotFound(err.to_string()),
            StoreError::AlreadyRunning {
                repository,
                running,
            } => Self::AlreadyRunning {
                repository,
                snapshot_id: running,
            },
            other => Self::Internal(other.to_string()),
        }
    }
}
