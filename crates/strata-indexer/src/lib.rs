//! Strata Indexer - Turning source trees into snapshots
//!
//! Drives a `SourceParser` across a solution, project or single file and
//! writes the translated facts into a `SnapshotStore`. Indexing is
//! file-isolated: a file that fails to parse is recorded and skipped.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use strata_core::TreeSitterParser;
//! use strata_graph::{SnapshotSource, SnapshotStore};
//! use strata_indexer::{CancellationSignal, Indexer, NoProgress};
//!
//! let store = Arc::new(SnapshotStore::new());
//! let indexer = Indexer::new(TreeSitterParser::new(), Arc::clone(&store));
//! let snapshot = store.create("web", SnapshotSource::new("./src")).unwrap();
//!
//! let result = indexer
//!     .index_solution(snapshot, Path::new("."), &CancellationSignal::new(), &NoProgress)
//!     .unwrap();
//! println!("Indexed {} files", result.files_indexed);
//! ```

mod cancel;
mod discover;
mod error;
mod indexer;
mod progress;
mod symbols;
mod watcher;

pub use cancel::CancellationSignal;
pub use discover::{discover_projects, enumerate, source_files, source_metadata, IndexScope};
pub use error::{IndexError, Result};
pub use indexer::{Indexer, IndexingResult};
pub use progress::{NoProgress, ProgressReporter};
pub use symbols::{PendingReference, SymbolTable, Translation};
pub use watcher::RepositoryWatcher;
