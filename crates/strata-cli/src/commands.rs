//! CLI command implementations.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{NodeId, OccurrenceRole, SourceParser, SymbolKind, TreeSitterParser};
use strata_graph::{SnapshotStatus, TraversalDirection};
use strata_indexer::IndexScope;
use strata_server::{
    watch_repositories, IndexService, JobStatus, QueryOptions, RepositoryConfig, StrataConfig,
    StrataServer, CONFIG_FILE, STATE_DIR,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Graph query flags.
pub struct QueryArgs {
    pub root: Option<u32>,
    pub depth: Option<usize>,
    pub max_nodes: Option<usize>,
    pub max_edges: Option<usize>,
    pub members: bool,
    pub namespace: Option<String>,
    pub kinds: Vec<SymbolKind>,
    pub direction: TraversalDirection,
}

fn load_config() -> Result<StrataConfig> {
    Ok(StrataConfig::load(&std::env::current_dir()?)?)
}

fn open_service(config: StrataConfig) -> Result<Arc<IndexService>> {
    let parser: Arc<dyn SourceParser> = Arc::new(TreeSitterParser::new());
    Ok(Arc::new(IndexService::open(Arc::new(config), parser)?))
}

/// Repository id derived from a directory name.
fn default_id(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "default".to_string())
}

/// The repository a read command targets: `--repo`, else the only
/// registered one.
fn repository_id(config: &StrataConfig, repo: Option<&str>) -> Result<String> {
    if let Some(repo) = repo {
        return Ok(repo.to_string());
    }
    match config.repositories.as_slice() {
        [only] => Ok(only.id.clone()),
        [] => Err("no repositories registered; run `strata init` or pass --repo".into()),
        many => {
            let ids: Vec<&str> = many.iter().map(|r| r.id.as_str()).collect();
            Err(format!("several repositories registered ({}); pass --repo", ids.join(", ")).into())
        }
    }
}

fn progress_line(status: &JobStatus) -> String {
    match status.files_discovered {
        None => "Scanning files...".to_string(),
        Some(total) => format!(
            "[{}/{} {:>3.0}%] {}",
            status.files_processed,
            total,
            status.percent_complete,
            status.current_file.as_deref().unwrap_or("")
        ),
    }
}

fn print_errors(status: &JobStatus) {
    if status.errors.is_empty() {
        return;
    }
    println!("\n{} files with parse errors:", "⚠".yellow());
    for error in status.errors.iter().take(5) {
        println!("  {} - {}", error.path.red(), error.message);
    }
    if status.errors.len() > 5 {
        println!("  ... and {} more", status.errors.len() - 5);
    }
}

/// Initialize Strata in a directory.
pub fn init(path: &Path) -> Result<()> {
    let config_path = path.join(STATE_DIR).join(CONFIG_FILE);

    if config_path.exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    let root = path.canonicalize()?;
    let mut config = StrataConfig::default();
    config
        .repositories
        .push(RepositoryConfig::new(default_id(&root), root.clone()));
    config.save(&config_path)?;

    println!("{} Initialized Strata in {}", "✓".green(), root.display());
    println!("  Run {} to index your codebase", "strata index".cyan());

    Ok(())
}

/// Index a repository and wait for the job to finish.
pub async fn index(path: &Path, repo: Option<&str>, scope: Option<IndexScope>) -> Result<()> {
    let config = load_config()?;
    let root = path
        .canonicalize()
        .map_err(|e| format!("{}: {}", path.display(), e))?;

    let registered = match repo {
        Some(id) => config.repository(id).cloned(),
        None => config.repositories.iter().find(|r| r.root == root).cloned(),
    };
    let id = repo
        .map(str::to_string)
        .or_else(|| registered.as_ref().map(|r| r.id.clone()))
        .unwrap_or_else(|| default_id(&root));
    let scope = scope
        .or_else(|| registered.as_ref().map(|r| r.scope))
        .unwrap_or_default();

    let service = open_service(config)?;
    service
        .orchestrator()
        .register(RepositoryConfig::new(id.clone(), root).with_scope(scope));

    println!("{}", "Indexing codebase...".cyan());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Scanning files...");

    service.queue_indexing(&id)?;

    let interrupt = {
        let service = Arc::clone(&service);
        let id = id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = service.cancel_job(&id);
            }
        })
    };

    let status = loop {
        match service.get_job_status(&id)? {
            Some(status) if !status.is_active() => break status,
            Some(status) => spinner.set_message(progress_line(&status)),
            None => {}
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    interrupt.abort();
    spinner.finish_and_clear();

    match status.status {
        SnapshotStatus::Completed => println!(
            "{} Indexed {} files ({} symbols, {} references) in {}ms, snapshot {}",
            "✓".green(),
            status.files_indexed.to_string().cyan(),
            status.symbols_indexed.to_string().cyan(),
            status.references_indexed.to_string().cyan(),
            status.duration_ms,
            status.snapshot_id
        ),
        SnapshotStatus::Cancelled => println!(
            "{} Cancelled after {} files, previous snapshot kept",
            "⚠".yellow(),
            status.files_indexed
        ),
        _ => {}
    }
    print_errors(&status);

    if status.status == SnapshotStatus::Failed {
        let reason = status
            .failure
            .clone()
            .unwrap_or_else(|| "every file failed to parse".to_string());
        return Err(format!("indexing failed: {}", reason).into());
    }
    Ok(())
}

/// Show the latest job of each repository.
pub fn status(repo: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let ids: Vec<String> = match repo {
        Some(id) => vec![id.to_string()],
        None => config.repositories.iter().map(|r| r.id.clone()).collect(),
    };

    if ids.is_empty() {
        println!("{} No repositories registered", "✗".red());
        println!("  Run {} to initialize", "strata init".cyan());
        return Ok(());
    }

    let service = open_service(config)?;

    println!("{}", "Strata Status".cyan().bold());
    println!();
    for id in ids {
        match service.get_job_status(&id)? {
            None => println!("  {} {}", id.bold(), "never indexed".dimmed()),
            Some(status) => {
                let label = match status.status {
                    SnapshotStatus::Completed if status.partial_success => {
                        "completed (partial)".yellow()
                    }
                    SnapshotStatus::Completed => "completed".green(),
                    SnapshotStatus::Failed => "failed".red(),
                    SnapshotStatus::Cancelled => "cancelled".yellow(),
                    other => other.as_str().cyan(),
                };
                println!(
                    "  {} {} {} {}",
                    id.bold(),
                    label,
                    format!("snapshot {}", status.snapshot_id).dimmed(),
                    format!(
                        "({} files, {} symbols, {} errors)",
                        status.files_indexed,
                        status.symbols_indexed,
                        status.errors.len()
                    )
                    .dimmed()
                );
            }
        }
    }

    Ok(())
}

/// Fetch a bounded subgraph.
pub fn query(repo: Option<&str>, args: QueryArgs, json_output: bool) -> Result<()> {
    let config = load_config()?;
    let repository = repository_id(&config, repo)?;
    let service = open_service(config)?;

    let options = QueryOptions {
        root_node_id: args.root.map(NodeId::new),
        max_depth: args.depth,
        max_nodes: args.max_nodes,
        max_edges: args.max_edges,
        include_members: args.members,
        namespace_filter: args.namespace,
        symbol_kind_filter: (!args.kinds.is_empty()).then(|| args.kinds.into_iter().collect()),
        direction: args.direction,
        ..QueryOptions::new(repository)
    };
    let data = service.query_graph(&options)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!(
        "{} nodes, {} edges\n",
        data.nodes.len().to_string().bold(),
        data.edges.len().to_string().bold()
    );
    for node in &data.nodes {
        println!(
            "  {:>6} {} {} {}",
            node.id.to_string().dimmed(),
            node.kind.to_string().yellow(),
            node.serialized_name.cyan(),
            format!("({}:{})", node.file, node.line).dimmed()
        );
    }
    if !data.edges.is_empty() {
        println!();
        for edge in &data.edges {
            println!(
                "  {} {} {}",
                edge.source,
                format!("-{}->", edge.kind).dimmed(),
                edge.target
            );
        }
    }
    if data.has_more {
        println!("\n{}", "More nodes are reachable; raise the budgets to see them.".yellow());
    }

    Ok(())
}

/// Search symbols in the latest snapshot.
pub fn search(term: &str, repo: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let repository = repository_id(&config, repo)?;
    let service = open_service(config)?;

    let matches = service.search_symbols(&repository, term)?;

    if matches.is_empty() {
        println!("No matches found for \"{}\"", term);
        return Ok(());
    }

    println!("Found {} matches:\n", matches.len());

    for hit in matches {
        println!(
            "  {} {} {} {}",
            hit.node_id.to_string().dimmed(),
            hit.kind.to_string().yellow(),
            hit.serialized_name.cyan(),
            format!("({}:{})", hit.file, hit.line).dimmed()
        );
        if let Some(ref sig) = hit.signature {
            println!("    {}", sig.dimmed());
        }
    }

    Ok(())
}

/// List every occurrence of a node.
pub fn refs(node: u32, repo: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let repository = repository_id(&config, repo)?;
    let service = open_service(config)?;

    let occurrences = service.find_references(&repository, NodeId::new(node))?;
    println!("Found {} occurrences:\n", occurrences.len());

    for occurrence in occurrences {
        let role = match occurrence.role {
            OccurrenceRole::Declaration => "decl".green(),
            OccurrenceRole::Reference => "ref ".cyan(),
        };
        let location = &occurrence.location;
        println!(
            "  {} {}",
            role,
            format!(
                "{}:{}:{}",
                location.file, location.line_start, location.column_start
            )
            .dimmed()
        );
        if let Some(ref context) = occurrence.context {
            println!("    {}", context.dimmed());
        }
    }

    Ok(())
}

/// Start the Strata server.
pub async fn serve(port: Option<u16>, headless: bool, watch: bool) -> Result<()> {
    let mut config = load_config()?;
    if let Some(port) = port {
        config.addr.set_port(port);
    }
    if headless {
        config.addr.set_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        println!("{}", "Starting Strata server in headless mode...".cyan());
    } else {
        println!("{}", "Starting Strata server...".cyan());
    }

    let addr = config.addr;
    let debounce = config.watch_debounce();
    let service = open_service(config)?;

    let repositories = service.orchestrator().repositories();
    println!("{} {} repositories registered", "✓".green(), repositories.len());

    let _watchers = if watch {
        let watchers = watch_repositories(service.orchestrator(), debounce)?;
        println!("{} Watching {} repositories", "✓".green(), watchers.len());
        watchers
    } else {
        Vec::new()
    };

    let server = StrataServer::new(service);

    println!("{} Listening on ws://{}", "✓".green(), addr);
    if headless {
        println!("  Headless mode: accepting connections from any host");
    }
    println!("  Press {} to stop", "Ctrl+C".cyan());

    server.run().await.map_err(|e| e.to_string())?;

    Ok(())
}
