//! Module graph: identifiers, records, the host-side graph engine and the
//! subgraph regeneration capability.

pub mod builder;
pub mod engine;
pub mod persistence;
pub mod types;

pub use builder::{
    resolve_import, FsRegenerator, GraphRegenerator, ImportScanner, RegenerateRequest,
    RegeneratedGraph,
};
pub use engine::{ModuleGraph, ModuleNode};
pub use persistence::{dump_subgraph, Snapshot};
pub use types::{
    DependencyMap, GraphStats, ModuleId, ModuleRecord, PathIndex, RawModule, ROOT_MODULE,
};
