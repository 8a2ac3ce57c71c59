//! Deterministic parser for server tests.

use std::fs;
use std::path::Path;
use strata_core::{FileFacts, Location, ReferenceKind, ReferenceTarget, SourceParser, SymbolKind};
use tempfile::{tempdir, TempDir};

/// `f<n>.py` yields module `f<n>` holding class `Handler<n>`, which calls
/// `Handler<n-1>`.
pub(crate) struct ChainParser;

impl SourceParser for ChainParser {
    fn supports(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "py")
    }

    fn extract(&self, path: &Path) -> strata_core::Result<FileFacts> {
        let stem = path.file_stem().unwrap().to_string_lossy().to_string();
        let n: u32 = stem.trim_start_matches('f').parse().unwrap_or(0);
        let file = path.to_string_lossy().to_string();

        let mut facts = FileFacts::new("python");
        let module = facts.push_symbol(
            stem.clone(),
            stem.clone(),
            SymbolKind::Module,
            Location::new(&file, 1, 0),
            None,
        );
        let class = facts.push_symbol(
            format!("{}.Handler{}", stem, n),
            format!("Handler{}", n),
            SymbolKind::Class,
            Location::new(&file, 2, 0),
            Some(module),
        );
        if n > 0 {
            facts.push_reference(
                class,
                ReferenceTarget::Named(format!("Handler{}", n - 1)),
                ReferenceKind::Call,
                Location::new(&file, 3, 4),
            );
        }
        Ok(facts)
    }
}

/// A directory with `f0.py` .. `f<files-1>.py`.
pub(crate) fn repo(files: usize) -> TempDir {
    let dir = tempdir().unwrap();
    for i in 0..files {
        fs::write(dir.path().join(format!("f{}.py", i)), format!("# {}", i)).unwrap();
    }
    dir
}
