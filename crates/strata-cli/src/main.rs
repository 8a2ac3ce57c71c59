//! Strata CLI - Command-line interface for Strata
//!
//! This is the main entry point for users interacting with Strata.
//! It provides commands for indexing repositories, querying snapshots and
//! serving the JSON-RPC protocol.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use strata_core::SymbolKind;
use strata_graph::TraversalDirection;
use strata_indexer::IndexScope;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Strata Contributors")]
#[command(version)]
#[command(about = "Versioned symbol graphs with bounded queries", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Strata in a directory and register it as a repository
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Index a repository into a new snapshot
    Index {
        /// Path to index (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Repository id (defaults to the directory name)
        #[arg(short, long)]
        repo: Option<String>,

        /// solution, project or file (defaults to the registered scope)
        #[arg(short, long)]
        scope: Option<IndexScope>,
    },

    /// Show the latest job of each repository
    Status {
        /// Only this repository
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// Fetch a bounded subgraph of the latest snapshot
    Query {
        #[arg(short, long)]
        repo: Option<String>,

        /// Start node; all top-level nodes when omitted
        #[arg(long)]
        root: Option<u32>,

        #[arg(short, long)]
        depth: Option<usize>,

        #[arg(long)]
        max_nodes: Option<usize>,

        #[arg(long)]
        max_edges: Option<usize>,

        /// Include fields, properties, events and enum members
        #[arg(long)]
        members: bool,

        /// Serialized-name prefix
        #[arg(long)]
        namespace: Option<String>,

        /// Only these symbol kinds (repeatable)
        #[arg(long)]
        kind: Vec<SymbolKind>,

        #[arg(long, default_value = "outgoing")]
        direction: TraversalDirection,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Search symbols by name
    Search {
        term: String,

        #[arg(short, long)]
        repo: Option<String>,
    },

    /// List every occurrence of a symbol
    Refs {
        node: u32,

        #[arg(short, long)]
        repo: Option<String>,
    },

    /// Start the Strata server
    Serve {
        /// Port to listen on (defaults to the configured address)
        #[arg(short, long)]
        port: Option<u16>,

        /// Headless mode: bind to 0.0.0.0 for remote access (WSL/Docker/Server)
        #[arg(long)]
        headless: bool,

        /// Re-index registered repositories when their files change
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init { path } => commands::init(&path),
        Commands::Index { path, repo, scope } => {
            commands::index(&path, repo.as_deref(), scope).await
        }
        Commands::Status { repo } => commands::status(repo.as_deref()),
        Commands::Query {
            repo,
            root,
            depth,
            max_nodes,
            max_edges,
            members,
            namespace,
            kind,
            direction,
            json,
        } => {
            let options = commands::QueryArgs {
                root,
                depth,
                max_nodes,
                max_edges,
                members,
                namespace,
                kinds: kind,
                direction,
            };
            commands::query(repo.as_deref(), options, json)
        }
        Commands::Search { term, repo } => commands::search(&term, repo.as_deref()),
        Commands::Refs { node, repo } => commands::refs(node, repo.as_deref()),
        Commands::Serve {
            port,
            headless,
            watch,
        } => commands::serve(port, headless, watch).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
