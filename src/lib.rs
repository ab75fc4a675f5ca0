//! # hotpack
//!
//! Incremental dev server with hot module replacement for JavaScript
//! bundles.
//!
//! hotpack takes the module graph of an initial build, serves it to the
//! browser as one bootstrap page, and then keeps it live: when a source
//! file changes only the affected modules are recompiled and pushed to
//! every open page over a WebSocket.
//!
//! ## Key Features
//!
//! - **Incremental**: Only the changed module and newly imported files are rebuilt
//! - **Always fresh**: A hard reload embeds every module compiled so far
//! - **Readable errors**: Compile errors show up in the browser overlay and console
//! - **Pluggable**: Graph regeneration and source transforms are traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hotpack::{start_dev_server, DevConfig, Snapshot};
//! use std::path::{Path, PathBuf};
//!
//! # async fn demo() -> hotpack::Result<()> {
//! let snapshot = Snapshot::load(Path::new("graph.json"))?;
//! start_dev_server(PathBuf::from("."), DevConfig::default(), snapshot).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod compiler;
pub mod config;
pub mod daemon;
pub mod error;
pub mod graph;
pub mod watcher;

// Re-exports for convenience
pub use error::{HotpackError, Result};

pub use cache::ModuleCache;
pub use compiler::{IncrementalCompiler, Patch, RecompileResult, SourceTransform};
pub use config::DevConfig;
pub use daemon::{start_dev_server, DevSession, SocketErrorPolicy, UpdateEvent, WatchOutcome};
pub use graph::{FsRegenerator, GraphRegenerator, ModuleGraph, ModuleId, ModuleRecord, Snapshot};
pub use watcher::{start_watching, WatchEvent, WatchKind};
