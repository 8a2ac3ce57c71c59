//! JSON-RPC 2.0 message types and method parameters.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::NodeId;
use strata_graph::RepositoryId;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success<T: Serialize>(id: Option<Value>, result: T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                jsonrpc: jsonrpc_version(),
                id,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::service_error(id, &ServiceError::Internal(e.to_string())),
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Maps a service error onto its status code, with any structured data.
    pub fn service_error(id: Option<Value>, err: &ServiceError) -> Self {
        let mut response = Self::error(id, err.status_code(), err.to_string());
        if let Some(error) = &mut response.error {
            error.data = err.data();
        }
        response
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Bad parameters are a validation failure like any other.
    pub fn invalid_params(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::service_error(id, &ServiceError::Validation(message.into()))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Params of `index.queue`, `index.status`, `index.cancel` and
/// `snapshot.info`.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryParams {
    pub repository: RepositoryId,
}

/// Params of `symbols.search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub repository: RepositoryId,
    #[serde(alias = "query")]
    pub term: String,
}

/// Params of `symbols.references`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesParams {
    pub repository: RepositoryId,
    pub node_id: NodeId,
}
