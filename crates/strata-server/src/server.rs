//! WebSocket server implementation.
//!
//! Handles client connections and routes messages to handlers.

use crate::handlers::{
    handle_cancel, handle_info, handle_queue, handle_query, handle_references, handle_search,
    handle_status,
};
use crate::protocol::{ReferencesParams, RepositoryParams, Request, Response, SearchParams};
use crate::service::{IndexService, QueryOptions};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The Strata JSON-RPC server.
pub struct StrataServer {
    addr: SocketAddr,
    service: Arc<IndexService>,
}

impl StrataServer {
    /// Creates a server listening on the configured address.
    pub fn new(service: Arc<IndexService>) -> Self {
        Self {
            addr: service.config().addr,
            service,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn service(&self) -> &Arc<IndexService> {
        &self.service
    }

    /// Binds and accepts connections forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("Strata server listening on {}", self.addr);
        self.serve(listener).await
    }

    /// Accepts connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);
                    let service = Arc::clone(&self.service);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, service).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handles a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: Arc<IndexService>,
) -> Result<(), BoxError> {
    let ws_stream = accept_async(stream).await?;
    info!("WebSocket connection established with {}", addr);

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("Message error from {}: {}", addr, e);
                break;
            }
        };

        if msg.is_close() {
            debug!("Client {} disconnected", addr);
            break;
        }

        if msg.is_ping() {
            write.send(Message::Pong(msg.into_data())).await?;
            continue;
        }

        if msg.is_text() {
            let text = msg.to_text().unwrap_or("");
            let response = process_message(text, &service);
            let json = serde_json::to_string(&response)?;
            write.send(Message::Text(json)).await?;
        }
    }

    info!("Connection closed: {}", addr);
    Ok(())
}

fn dispatch<P, F>(request: Request, handler: F) -> Response
where
    P: DeserializeOwned,
    F: FnOnce(Option<serde_json::Value>, P) -> Response,
{
    match serde_json::from_value::<P>(request.params) {
        Ok(params) => handler(request.id, params),
        Err(e) => Response::invalid_params(request.id, e.to_string()),
    }
}

/// Processes a JSON-RPC message and returns a response.
pub fn process_message(text: &str, service: &IndexService) -> Response {
    let request: Request = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => return Response::parse_error(),
    };

    let method = request.method.clone();
    debug!("Processing method: {}", method);

    match method.as_str() {
        "index.queue" => dispatch::<RepositoryParams, _>(request, |id, p| {
            handle_queue(service, id, p)
        }),
        "index.status" => dispatch::<RepositoryParams, _>(request, |id, p| {
            handle_status(service, id, p)
        }),
        "index.cancel" => dispatch::<RepositoryParams, _>(request, |id, p| {
            handle_cancel(service, id, p)
        }),
        "graph.query" => {
            dispatch::<QueryOptions, _>(request, |id, p| handle_query(service, id, p))
        }
        "symbols.search" => {
            dispatch::<SearchParams, _>(request, |id, p| handle_search(service, id, p))
        }
        "symbols.references" => dispatch::<ReferencesParams, _>(request, |id, p| {
            handle_references(service, id, p)
        }),
        "snapshot.info" => {
            dispatch::<RepositoryParams, _>(request, |id, p| handle_info(service, id, p))
        }
        _ => Response::method_not_found(request.id, &method),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RepositoryConfig, StrataConfig};
    use crate::protocol::{METHOD_NOT_FOUND, PARSE_ERROR};
    use crate::testing::{repo, ChainParser};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> Arc<IndexService> {
        let config = StrataConfig {
            archive_path: None,
            repositories: vec![RepositoryConfig::new("web", dir.path())],
            ..StrataConfig::default()
        };
        Arc::new(IndexService::open(Arc::new(config), Arc::new(ChainParser)).unwrap())
    }

    fn call(service: &IndexService, method: &str, params: Value) -> Value {
        let text = serde_json::to_string(&Request::new(1, method, params)).unwrap();
        serde_json::to_value(process_message(&text, service)).unwrap()
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let dir = repo(1);
        let service = service(&dir);

        let bad = serde_json::to_value(process_message("{nope", &service)).unwrap();
        assert_eq!(bad["error"]["code"], PARSE_ERROR);

        let unknown = call(&service, "graph.explode", json!({}));
        assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(unknown["id"], 1);

        let missing = call(&service, "index.queue", json!({}));
        assert_eq!(missing["error"]["code"], 400);

        let unregistered = call(&service, "index.queue", json!({"repository": "api"}));
        assert_eq!(unregistered["error"]["code"], 404);

        let no_snapshot = call(&service, "graph.query", json!({"repository": "web"}));
        assert_eq!(no_snapshot["error"]["code"], 404);
    }

    #[tokio::test]
    async fn test_queue_then_read() {
        let dir = repo(3);
        let service = service(&dir);

        let queued = call(&service, "index.queue", json!({"repository": "web"}));
        let snapshot_id = queued["result"]["snapshotId"].clone();
        assert!(snapshot_id.is_u64());
        service.orchestrator().wait("web").await;

        let status = call(&service, "index.status", json!({"repository": "web"}));
        assert_eq!(status["result"]["status"], "Completed");
        assert_eq!(status["result"]["snapshotId"], snapshot_id);

        let query = call(
            &service,
            "graph.query",
            json!({"repository": "web", "rootNodeId": 5, "maxDepth": 1}),
        );
        assert_eq!(query["result"]["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(query["result"]["hasMore"], true);

        let search = call(
            &service,
            "symbols.search",
            json!({"repository": "web", "term": "Handler"}),
        );
        assert_eq!(search["result"]["results"].as_array().unwrap().len(), 3);

        let refs = call(
            &service,
            "symbols.references",
            json!({"repository": "web", "nodeId": 1}),
        );
        assert_eq!(refs["result"]["occurrences"].as_array().unwrap().len(), 2);

        let info = call(&service, "snapshot.info", json!({"repository": "web"}));
        assert_eq!(info["result"]["stats"]["nodeCount"], 6);

        let cancel = call(&service, "index.cancel", json!({"repository": "web"}));
        assert_eq!(cancel["result"]["cancelled"], false);
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let dir = repo(1);
        let server = StrataServer::new(service(&dir));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        let request = Request::new(7, "index.status", json!({"repository": "web"}));
        socket
            .send(Message::Text(serde_json::to_string(&request).unwrap()))
            .await
            .unwrap();

        let reply = loop {
            match socket.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        let response: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(response["id"], 7);
        assert!(response.get("error").is_none());
        assert_eq!(response["result"], Value::Null);
    }
}
