//! Snapshot persistence: load the host's initial module graph and dump
//! regenerated subgraphs for inspection.
//!
//! Dumps use an atomic write (write to .tmp, then rename) so a reader never
//! sees a half-written file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use super::types::{ModuleId, ModuleRecord, RawModule};
use crate::error::{HotpackError, Result};

/// The initial build handed over by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub modules: Vec<ModuleRecord>,
}

impl Snapshot {
    /// Load a snapshot from a JSON file. The `root` module must be present.
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading module graph snapshot");

        let bytes = fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

        if !snapshot.modules.iter().any(|m| m.id == ModuleId::root()) {
            return Err(HotpackError::Config(format!(
                "snapshot {} has no `root` module",
                path.display()
            )));
        }

        debug!(modules = snapshot.modules.len(), "snapshot loaded");
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

/// Write a regenerated subgraph as pretty JSON.
pub fn dump_subgraph(path: &Path, modules: &[RawModule]) -> Result<()> {
    debug!(path = %path.display(), modules = modules.len(), "dumping regenerated subgraph");
    write_json_atomic(path, &modules)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
