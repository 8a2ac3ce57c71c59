//! Request handlers for protocol methods.
//!
//! Each handler implements one method and turns the service result into a
//! JSON-RPC response.

use crate::error::Result;
use crate::protocol::{ReferencesParams, RepositoryParams, Response, SearchParams};
use crate::service::{IndexService, QueryOptions, SnapshotInfo, SymbolSearchResult};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use strata_core::Occurrence;
use strata_graph::{GraphData, SnapshotId};
use tracing::debug;

fn reply<T: Serialize>(id: Option<Value>, result: Result<T>) -> Response {
    match result {
        Ok(value) => Response::success(id, value),
        Err(e) => {
            debug!("request failed: {}", e);
            Response::service_error(id, &e)
        }
    }
}

/// Handles `index.queue`.
pub fn handle_queue(service: &IndexService, id: Option<Value>, params: RepositoryParams) -> Response {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct QueueResult {
        snapshot_id: SnapshotId,
    }

    let result = service
        .queue_indexing(&params.repository)
        .map(|snapshot_id| QueueResult { snapshot_id });
    reply(id, result)
}

/// Handles `index.status`. `null` when the repository was never indexed.
pub fn handle_status(service: &IndexService, id: Option<Value>, params: RepositoryParams) -> Response {
    reply(id, service.get_job_status(&params.repository))
}

/// Handles `index.cancel`.
pub fn handle_cancel(service: &IndexService, id: Option<Value>, params: RepositoryParams) -> Response {
    #[derive(Serialize)]
    struct CancelResult {
        cancelled: bool,
    }

    let result = service
        .cancel_job(&params.repository)
        .map(|cancelled| CancelResult { cancelled });
    reply(id, result)
}

/// Handles `graph.query`.
pub fn handle_query(service: &IndexService, id: Option<Value>, options: QueryOptions) -> Response {
    let start = Instant::now();

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct QueryResult {
        #[serde(flatten)]
        data: GraphData,
        query_time: u64,
    }

    let result = service.query_graph(&options).map(|data| QueryResult {
        data,
        query_time: start.elapsed().as_millis() as u64,
    });
    reply(id, result)
}

/// Handles `symbols.search`.
pub fn handle_search(service: &IndexService, id: Option<Value>, params: SearchParams) -> Response {
    let start = Instant::now();

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct SearchResult {
        results: Vec<SymbolSearchResult>,
        query_time: u64,
    }

    let result = service
        .search_symbols(&params.repository, &params.term)
        .map(|results| SearchResult {
            results,
            query_time: start.elapsed().as_millis() as u64,
        });
    reply(id, result)
}

/// Handles `symbols.references`.
pub fn handle_references(
    service: &IndexService,
    id: Option<Value>,
    params: ReferencesParams,
) -> Response {
    #[derive(Serialize)]
    struct ReferencesResult {
        occurrences: Vec<Occurrence>,
    }

    let result = service
        .find_references(&params.repository, params.node_id)
        .map(|occurrences| ReferencesResult { occurrences });
    reply(id, result)
}

/// Handles `snapshot.info`.
pub fn handle_info(service: &IndexService, id: Option<Value>, params: RepositoryParams) -> Response {
    #[derive(Serialize)]
    struct InfoResult {
        #[serde(flatten)]
        info: SnapshotInfo,
        version: &'static str,
    }

    let result = service
        .snapshot_info(&params.repository)
        .map(|info| InfoResult {
            info,
            version: env!("CARGO_PKG_VERSION"),
        });
    reply(id, result)
}
