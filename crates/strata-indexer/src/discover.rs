//! File enumeration and repository metadata.
//!
//! A solution is a directory tree holding one or more projects. A project is
//! any directory with a `Cargo.toml`, `pyproject.toml` or `setup.py`.
//! Files are collected per project with gitignore rules applied, then
//! deduplicated and sorted so every run sees the same order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use strata_core::SourceParser;
use strata_graph::SnapshotSource;
use tracing::{debug, warn};
use walkdir::WalkDir;

const PROJECT_MANIFESTS: &[&str] = &["Cargo.toml", "pyproject.toml", "setup.py"];

/// Directories never worth descending into.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv", "dist"];

/// How much of the tree under a path one run covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexScope {
    /// Every project below the path.
    #[default]
    Solution,
    /// The path is a single project directory.
    Project,
    /// The path is one source file.
    File,
}

impl std::str::FromStr for IndexScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solution" => Ok(Self::Solution),
            "project" => Ok(Self::Project),
            "file" => Ok(Self::File),
            other => Err(format!("unknown scope '{}'", other)),
        }
    }
}

fn is_skipped(name: &str) -> bool {
    (name.starts_with('.') && name.len() > 1) || SKIPPED_DIRS.contains(&name)
}

/// Project directories below `root`, sorted. Falls back to `root` itself.
pub fn discover_projects(root: &Path) -> Vec<PathBuf> {
    let projects: BTreeSet<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !is_skipped(&e.file_name().to_string_lossy())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| PROJECT_MANIFESTS.iter().any(|m| e.path().join(m).is_file()))
        .map(|e| e.into_path())
        .collect();

    if projects.is_empty() {
        vec![root.to_path_buf()]
    } else {
        projects.into_iter().collect()
    }
}

/// Source files under `dir` the parser understands, honoring `.gitignore`.
pub fn source_files<P: SourceParser + ?Sized>(dir: &Path, parser: &P) -> Vec<PathBuf> {
    let walker = ignore::WalkBuilder::new(dir)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_some_and(|t| t.is_dir())
                || !is_skipped(&e.file_name().to_string_lossy())
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("walk error: {}", e);
                continue;
            }
        };
        if entry.file_type().is_some_and(|t| t.is_file()) && parser.supports(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files
}

/// The sorted, deduplicated file set a run over `path` covers.
pub fn enumerate<P: SourceParser + ?Sized>(
    path: &Path,
    scope: IndexScope,
    parser: &P,
) -> Vec<PathBuf> {
    let files: BTreeSet<PathBuf> = match scope {
        IndexScope::File => std::iter::once(path.to_path_buf()).collect(),
        IndexScope::Project => source_files(path, parser).into_iter().collect(),
        IndexScope::Solution => {
            let projects = discover_projects(path);
            debug!("Found {} projects under {}", projects.len(), path.display());
            projects
                .iter()
                .flat_map(|p| source_files(p, parser))
                .collect()
        }
    };
    files.into_iter().collect()
}

/// Reads commit and branch from the enclosing git checkout, if any.
pub fn source_metadata(root: &Path) -> SnapshotSource {
    let mut source = SnapshotSource::new(root.to_string_lossy());

    let Some(git_dir) = root.ancestors().map(|a| a.join(".git")).find(|g| g.is_dir()) else {
        return source;
    };
    let Ok(head) = fs::read_to_string(git_dir.join("HEAD")) else {
        return source;
    };
    let head = head.trim();

    match head.strip_prefix("ref: ") {
        Some(reference) => {
            source.branch = reference
                .strip_prefix("refs/heads/")
                .map(|b| b.to_string());
            source.commit = resolve_ref(&git_dir, reference);
        }
        None if !head.is_empty() => source.commit = Some(head.to_string()),
        None => {}
    }
    source
}

fn resolve_ref(git_dir: &Path, reference: &str) -> Option<String> {
    if let Ok(sha) = fs::read_to_string(git_dir.join(reference)) {
        return Some(sha.trim().to_string());
    }
    let packed = fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed
        .lines()
        .filter(|l| !l.starts_with('#') && !l.starts_with('^'))
        .filter_map(|l| l.split_once(' '))
        .find(|(_, name)| *name == reference)
        .map(|(sha, _)| sha.to_string())
}
