//! Error taxonomy for the on-disk stores.
//!
//! Core modules return [`Result`]; the command-line layer wraps these in
//! `anyhow` with extra context.

use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed row {line} in {}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("invalid settings file {}: {reason}", path.display())]
    Schema { path: PathBuf, reason: String },
    #[error("no shell options registered for {path}")]
    ShellNotFound { path: String },
    #[error("{0}")]
    InvalidInput(String),
    /// An append sequence stopped part way; earlier stores were written.
    #[error(
        "failed to append to {} after updating {written:?}: {source}; the shell stores are now misaligned",
        failed.display()
    )]
    PartialAppend {
        written: Vec<String>,
        failed: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to commit {}: {source} (rolled back: {rolled_back})", path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        rolled_back: bool,
    },
}

pub fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidInput(message.into())
}
