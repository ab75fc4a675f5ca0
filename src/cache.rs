//! Module cache: the dev session's view of every module.
//!
//! The initial build's modules are kept as a read-only snapshot; every
//! recompilation overlays its records on top. Lookups always prefer the
//! overlay. Nothing is evicted for the lifetime of the session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::compiler::ModuleInit;
use crate::graph::{ModuleId, ModuleRecord, PathIndex};

#[derive(Debug, Clone)]
struct CachedEntry {
    record: ModuleRecord,
    generation: u64,
    unlinked: bool,
}

#[derive(Debug, Default)]
pub struct ModuleCache {
    initial: HashMap<ModuleId, ModuleRecord>,
    initial_order: Vec<ModuleId>,
    compiled: HashMap<ModuleId, CachedEntry>,
    paths: PathIndex,
    generation: u64,
}

impl ModuleCache {
    /// Seed the cache with the initial build.
    pub fn new(initial: Vec<ModuleRecord>) -> Self {
        let mut cache = Self::default();
        for record in initial {
            cache.paths.insert(record.path.clone(), record.id.clone());
            cache.initial_order.push(record.id.clone());
            cache.initial.insert(record.id.clone(), record);
        }
        cache
    }

    /// Most recently compiled version, else the initial one.
    pub fn get(&self, id: &ModuleId) -> Option<&ModuleRecord> {
        self.compiled
            .get(id)
            .map(|entry| &entry.record)
            .or_else(|| self.initial.get(id))
    }

    /// Overwrite the record for its id and index its path.
    pub fn put(&mut self, record: ModuleRecord) -> u64 {
        self.generation += 1;
        self.paths.insert(record.path.clone(), record.id.clone());
        debug!(module = %record.id, generation = self.generation, "cached module");
        self.compiled.insert(
            record.id.clone(),
            CachedEntry {
                record,
                generation: self.generation,
                unlinked: false,
            },
        );
        self.generation
    }

    /// Index extra path → id entries reported by the host.
    pub fn register_paths(&mut self, entries: PathIndex) {
        self.paths.extend(entries);
    }

    /// Turn a module into a tombstone. Returns `false` when it already was
    /// one or is unknown.
    pub fn unlink(&mut self, id: &ModuleId) -> bool {
        if self.is_unlinked(id) {
            return false;
        }
        let Some(record) = self.get(id).cloned() else {
            return false;
        };
        self.generation += 1;
        self.compiled.insert(
            id.clone(),
            CachedEntry {
                record,
                generation: self.generation,
                unlinked: true,
            },
        );
        true
    }

    pub fn is_unlinked(&self, id: &ModuleId) -> bool {
        self.compiled.get(id).map_or(false, |entry| entry.unlinked)
    }

    pub fn is_cached(&self, id: &ModuleId) -> bool {
        self.compiled.contains_key(id)
    }

    pub fn lookup_path(&self, path: &Path) -> Option<ModuleId> {
        self.paths.get(path).cloned()
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.paths.keys().cloned().collect()
    }

    /// Current generation; bumps on every `put` and `unlink`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Initial modules as initializers, in snapshot order.
    pub fn initial_inits(&self) -> Vec<ModuleInit> {
        self.initial_order
            .iter()
            .filter_map(|id| self.initial.get(id))
            .map(|record| ModuleInit::new(record.id.clone(), record.content.clone()))
            .collect()
    }

    /// Initializers for every overlay entry newer than `generation`, oldest
    /// first. Tombstones become stubs exporting `null`.
    pub fn inits_since(&self, generation: u64) -> Vec<ModuleInit> {
        let mut entries: Vec<&CachedEntry> = self
            .compiled
            .values()
            .filter(|entry| entry.generation > generation)
            .collect();
        entries.sort_by_key(|entry| entry.generation);
        entries
            .into_iter()
            .map(|entry| {
                if entry.unlinked {
                    ModuleInit::unlinked(entry.record.id.clone())
                } else {
                    ModuleInit::new(entry.record.id.clone(), entry.record.content.clone())
                }
            })
            .collect()
    }
}
