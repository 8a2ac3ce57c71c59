//! Strata Server - Job orchestration and the Strata JSON-RPC protocol
//!
//! This crate schedules indexing jobs and exposes the service surface that
//! IDE integrations and the CLI talk to.
//!
//! The server supports:
//! - One indexing job per repository at a time, many repositories at once
//! - Live job status and cooperative cancellation
//! - JSON-RPC 2.0 messages over WebSocket
//! - Re-indexing registered repositories when their files change

mod config;
mod error;
mod handlers;
mod orchestrator;
mod protocol;
mod server;
mod service;
mod watch;

#[cfg(test)]
mod testing;

pub use config::{
    ConfigError, QueryLimits, RepositoryConfig, StrataConfig, CONFIG_FILE, STATE_DIR,
};
pub use error::{Result, ServiceError};
pub use orchestrator::{JobOrchestrator, JobStatus};
pub use protocol::{Request, Response, RpcError};
pub use server::{process_message, StrataServer};
pub use service::{IndexService, QueryOptions, SnapshotInfo, SymbolSearchResult};
pub use watch::watch_repositories;
