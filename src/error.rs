//! Error types for hotpack.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::ModuleId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HotpackError>;

#[derive(Debug, Error)]
pub enum HotpackError {
    /// A module failed to transform. Recovered at the recompilation
    /// boundary and surfaced to connected clients.
    #[error("{message}")]
    Compile { path: PathBuf, message: String },

    /// The source transform itself reported a failure.
    #[error("transform failed: {0}")]
    Transform(String),

    /// A watcher event could not be turned into a graph operation.
    #[error("watch dispatch error: {0}")]
    WatchDispatch(String),

    /// Connection-level WebSocket failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// A static asset could not be read.
    #[error("failed to serve {path}: {source}")]
    BootstrapIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module not found: {0}")]
    ModuleNotFound(ModuleId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl HotpackError {
    /// Whether this error must bring the dev session down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HotpackError::Socket(_) | HotpackError::Config(_))
    }
}
