//! Incremental compiler: recompiles only the modules a file change touches.
//!
//! ## Flow
//!
//! ```text
//! changed (id, path)
//!   → cached dependency map of id          (module cache)
//!   → regenerate affected subgraph         (host capability)
//!   → transform each module                (build pipeline capability)
//!   → wrap as module initializers          (patch)
//!   → records with merged dependency maps  (handed back for caching)
//! ```

pub mod diagnostics;
pub mod patch;
pub mod transform;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::ModuleCache;
use crate::error::{HotpackError, Result};
use crate::graph::{
    dump_subgraph, DependencyMap, GraphRegenerator, ModuleId, ModuleRecord, PathIndex,
    RegenerateRequest,
};

pub use diagnostics::{rewrite_module_refs, Diagnostics, ErrorReport};
pub use patch::{ModuleInit, Patch};
pub use transform::{CommandTransform, Passthrough, SourceTransform, TransformOptions};

/// Output of one successful recompilation.
#[derive(Debug, Clone)]
pub struct RecompileResult {
    pub patch: Patch,
    /// Records to write into the module cache, in patch order.
    pub records: Vec<ModuleRecord>,
    /// Path → id entries reported by the host for the subgraph.
    pub path_index: PathIndex,
    pub graph_size: usize,
    pub elapsed: Duration,
}

pub struct IncrementalCompiler {
    cwd: PathBuf,
    regenerator: Arc<dyn GraphRegenerator>,
    transform: Arc<dyn SourceTransform>,
    options: TransformOptions,
    graph_dump: Option<PathBuf>,
}

impl IncrementalCompiler {
    pub fn new(
        cwd: PathBuf,
        regenerator: Arc<dyn GraphRegenerator>,
        transform: Arc<dyn SourceTransform>,
        options: TransformOptions,
    ) -> Self {
        Self {
            cwd,
            regenerator,
            transform,
            options,
            graph_dump: None,
        }
    }

    /// Write every regenerated subgraph to `path` as JSON.
    pub fn with_graph_dump(mut self, path: Option<PathBuf>) -> Self {
        self.graph_dump = path;
        self
    }

    pub fn regenerator(&self) -> &Arc<dyn GraphRegenerator> {
        &self.regenerator
    }

    /// Recompile the subgraph reachable from a change to `changed`.
    ///
    /// The cache is only read, and never held across the regenerate or
    /// transform calls. Any failure aborts the whole recompilation and comes
    /// back as [`HotpackError::Compile`] with `_mod_<id>` references mapped
    /// back to import strings.
    pub fn recompile(
        &self,
        cache: &RwLock<ModuleCache>,
        changed: &ModuleId,
        absolute_path: &Path,
    ) -> Result<RecompileResult> {
        let started = Instant::now();

        let changed_deps = read_cache(cache)?
            .get(changed)
            .map(|m| m.dependencies.clone())
            .ok_or_else(|| HotpackError::Compile {
                path: absolute_path.to_path_buf(),
                message: HotpackError::ModuleNotFound(changed.clone()).to_string(),
            })?;

        self.compile_subgraph(cache, changed, absolute_path, &changed_deps, started)
            .map_err(|e| match e {
                HotpackError::Compile { path, message } => HotpackError::Compile {
                    message: rewrite_module_refs(&message, &changed_deps),
                    path,
                },
                other => HotpackError::Compile {
                    path: absolute_path.to_path_buf(),
                    message: rewrite_module_refs(&error_text(&other), &changed_deps),
                },
            })
    }

    fn compile_subgraph(
        &self,
        cache: &RwLock<ModuleCache>,
        changed: &ModuleId,
        absolute_path: &Path,
        changed_deps: &DependencyMap,
        started: Instant,
    ) -> Result<RecompileResult> {
        let sources: Vec<String> = changed_deps.keys().cloned().collect();
        let is_defined =
            |id: &ModuleId| read_cache(cache).map_or(false, |cache| cache.get(id).is_some());
        let regenerated = self.regenerator.regenerate(RegenerateRequest {
            cwd: &self.cwd,
            changed_id: changed,
            absolute_path,
            dependencies: changed_deps,
            dependency_sources: &sources,
            is_defined: &is_defined,
        })?;
        debug!(module = %changed, size = regenerated.graph_size, "subgraph regenerated");

        if let Some(dump) = &self.graph_dump {
            if let Err(e) = dump_subgraph(dump, &regenerated.modules) {
                warn!(path = %dump.display(), error = %e, "failed to dump subgraph");
            }
        }

        let mut patch = Patch::new();
        let mut records = Vec::with_capacity(regenerated.modules.len());

        for module in regenerated.modules {
            let output = self
                .transform
                .transform(&module.content, &self.options)
                .map_err(|e| HotpackError::Compile {
                    path: module.path.clone(),
                    message: rewrite_module_refs(&error_text(&e), &module.dependencies),
                })?;

            // Union, old then new: stale entries are kept so path lookups for
            // untouched modules stay valid.
            let mut dependencies = read_cache(cache)?
                .get(&module.id)
                .map(|m| m.dependencies.clone())
                .unwrap_or_default();
            dependencies.extend(module.dependencies);

            patch.push(ModuleInit::new(module.id.clone(), output.code.clone()));
            records.push(ModuleRecord {
                id: module.id,
                path: module.path,
                content: output.code,
                dependencies,
            });
        }

        let elapsed = started.elapsed();
        info!(
            module = %changed,
            modules = records.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "rebuilt"
        );

        Ok(RecompileResult {
            patch,
            records,
            path_index: regenerated.dependency_map,
            graph_size: regenerated.graph_size,
            elapsed,
        })
    }
}

fn read_cache(cache: &RwLock<ModuleCache>) -> Result<std::sync::RwLockReadGuard<'_, ModuleCache>> {
    cache
        .read()
        .map_err(|e| HotpackError::Transform(format!("module cache lock poisoned: {}", e)))
}

/// The message a user should see, without our own error prefixes.
fn error_text(error: &HotpackError) -> String {
    match error {
        HotpackError::Transform(message) => message.clone(),
        HotpackError::Compile { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
