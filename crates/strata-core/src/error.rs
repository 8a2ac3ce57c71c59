//! Error types for source parsing.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

/// A failure to extract facts from one file. Always recoverable for the run.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported language for {0}")]
    UnsupportedLanguage(PathBuf),

    #[error("file is not valid UTF-8: {0}")]
    InvalidEncoding(PathBuf),

    #[error("parser error: {0}")]
    ParserError(String),
}

impl ParseError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::InvalidData {
            return Self::InvalidEncoding(path.to_path_buf());
        }
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
