use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for dessi operations
#[derive(Error, Debug)]
pub enum DessiError {
    /// IO error when reading files or directories
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid run configuration, reported before any filesystem writes
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// File not found error with specific path
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// A source or included file exists but could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An include directive points at a file that does not exist
    #[error("Included file not found: \"{virtual_path}\" (resolved to {path})")]
    IncludeNotFound { virtual_path: String, path: PathBuf },

    /// Include nesting went deeper than the configured limit
    #[error("Include depth limit of {max_depth} exceeded while expanding {path}")]
    IncludeDepthExceeded { path: PathBuf, max_depth: usize },

    /// A file includes itself, directly or through other files
    #[error("Include cycle detected: {}", format_chain(.chain))]
    IncludeCycle { chain: Vec<PathBuf> },

    /// Include path escapes the root directory while confinement is enabled
    #[error("Path traversal detected (include resolves outside the root directory): {path}")]
    PathTraversal { path: PathBuf },

    /// Target file or directory could not be created or written
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Regex compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Invalid exclude pattern
    #[error("Glob error: {0}")]
    Glob(#[from] globset::Error),

    /// `WalkDir` error when traversing directories
    #[error("Directory traversal error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DessiError {
    /// Shorthand for a [`DessiError::Config`] with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, DessiError>;
