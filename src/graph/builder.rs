//! Graph builder: regenerates the subgraph affected by a file change.
//!
//! The host build engine normally provides this capability. `FsRegenerator`
//! is a self-contained host: it owns a [`ModuleGraph`] seeded from the
//! initial snapshot, re-reads the changed file, and walks forward only
//! through imports that point at files the graph has never seen.

use regex::{Captures, Regex};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::engine::ModuleGraph;
use super::types::{DependencyMap, ModuleId, ModuleRecord, PathIndex, RawModule};
use crate::error::{HotpackError, Result};

/// Arguments of a "regenerate module graph" call.
#[derive(Clone, Copy)]
pub struct RegenerateRequest<'a> {
    pub cwd: &'a Path,
    pub changed_id: &'a ModuleId,
    pub absolute_path: &'a Path,
    /// The changed module's currently cached dependency mapping.
    pub dependencies: &'a DependencyMap,
    /// Import source strings of `dependencies`.
    pub dependency_sources: &'a [String],
    /// Whether clients already hold a definition for a module. A module the
    /// graph knows but clients do not, e.g. one whose last compile failed,
    /// must be compiled again.
    pub is_defined: &'a dyn Fn(&ModuleId) -> bool,
}

/// The subgraph that must be recompiled.
#[derive(Debug, Clone, Default)]
pub struct RegeneratedGraph {
    /// Changed module first, then newly discovered modules in discovery order.
    pub modules: Vec<RawModule>,
    pub graph_size: usize,
    /// Path → id entries for every module in `modules`.
    pub dependency_map: PathIndex,
}

/// Recomputes the minimal affected subgraph for one changed file.
pub trait GraphRegenerator: Send + Sync {
    fn regenerate(&self, request: RegenerateRequest<'_>) -> Result<RegeneratedGraph>;

    /// Called when a tracked file is deleted. Returns the modules that still
    /// import it.
    fn module_removed(&self, _id: &ModuleId) -> Vec<ModuleId> {
        Vec::new()
    }
}

/// Extensions probed when an import omits one, in order.
const RESOLVE_SUFFIXES: &[&str] = &["", ".js", ".jsx", ".ts", ".mjs", "/index.js"];

const IMPORT_PATTERN: &str = concat!(
    r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
    r#"|import\s+(?:[\w*{}\s,$]+\s+from\s+)?['"]([^'"]+)['"]"#,
    r#"|export\s+[\w*{}\s,$]+\s+from\s+['"]([^'"]+)['"]"#,
);

/// Finds import source strings in module source text.
#[derive(Debug, Clone)]
pub struct ImportScanner {
    pattern: Regex,
}

impl ImportScanner {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(IMPORT_PATTERN)
            .map_err(|e| HotpackError::Config(format!("import pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Import sources in order of first appearance.
    pub fn scan(&self, source: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pattern
            .captures_iter(source)
            .filter_map(|caps| specifier(&caps).map(|m| m.as_str().to_string()))
            .filter(|spec| seen.insert(spec.clone()))
            .collect()
    }

    /// Rewrite every resolved import source to its `_mod_<id>` slot.
    pub fn rewrite(&self, source: &str, dependencies: &DependencyMap) -> String {
        self.pattern
            .replace_all(source, |caps: &Captures| {
                let whole = &caps[0];
                let (Some(full), Some(spec)) = (caps.get(0), specifier(caps)) else {
                    return whole.to_string();
                };
                match dependencies.get(spec.as_str()) {
                    Some(id) => format!(
                        "{}{}{}",
                        &source[full.start()..spec.start()],
                        id.slot(),
                        &source[spec.end()..full.end()]
                    ),
                    None => whole.to_string(),
                }
            })
            .into_owned()
    }
}

fn specifier<'t>(caps: &Captures<'t>) -> Option<regex::Match<'t>> {
    caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))
}

/// Resolve a relative or absolute import against the importing file.
/// Bare package imports are not part of the tracked graph.
pub fn resolve_import(cwd: &Path, importer: &Path, spec: &str) -> Option<PathBuf> {
    let base = if spec.starts_with("./") || spec.starts_with("../") {
        importer.parent()?.join(spec)
    } else if let Some(rest) = spec.strip_prefix('/') {
        cwd.join(rest)
    } else {
        return None;
    };

    RESOLVE_SUFFIXES
        .iter()
        .map(|suffix| PathBuf::from(format!("{}{}", base.display(), suffix)))
        .find(|candidate| candidate.is_file())
        .map(|found| found.canonicalize().unwrap_or(found))
}

/// Reference host implementation working straight off the filesystem.
pub struct FsRegenerator {
    graph: Mutex<ModuleGraph>,
    scanner: ImportScanner,
}

impl FsRegenerator {
    pub fn new<'a>(records: impl IntoIterator<Item = &'a ModuleRecord>) -> Result<Self> {
        Ok(Self {
            graph: Mutex::new(ModuleGraph::from_records(records)),
            scanner: ImportScanner::new()?,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ModuleGraph>> {
        self.graph
            .lock()
            .map_err(|e| HotpackError::Transform(format!("graph lock poisoned: {}", e)))
    }
}

impl GraphRegenerator for FsRegenerator {
    fn regenerate(&self, request: RegenerateRequest<'_>) -> Result<RegeneratedGraph> {
        let mut graph = self.lock()?;

        let mut result = RegeneratedGraph::default();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((request.changed_id.clone(), request.absolute_path.to_path_buf()));

        while let Some((id, path)) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }

            let source = fs::read_to_string(&path)?;
            let is_changed = &id == request.changed_id;
            let mut dependencies = DependencyMap::new();

            for spec in self.scanner.scan(&source) {
                if is_changed {
                    if let Some(known) = request.dependencies.get(&spec) {
                        if graph.contains(known)
                            && !graph.is_removed(known)
                            && (request.is_defined)(known)
                        {
                            dependencies.insert(spec, known.clone());
                            continue;
                        }
                    }
                }

                let Some(target) = resolve_import(request.cwd, &path, &spec) else {
                    debug!(module = %id, import = %spec, "import is not a tracked file");
                    continue;
                };

                let target_id = match graph.id_for_path(&target) {
                    Some(existing) => {
                        if graph.is_removed(&existing) || !(request.is_defined)(&existing) {
                            debug!(module = %existing, "known module has no live definition");
                            queue.push_back((existing.clone(), target));
                        }
                        existing
                    }
                    None => {
                        let fresh = graph.allocate_id();
                        graph.add_module(fresh.clone(), target.clone());
                        debug!(module = %fresh, path = %target.display(), "discovered module");
                        queue.push_back((fresh.clone(), target));
                        fresh
                    }
                };
                dependencies.insert(spec, target_id);
            }

            if is_changed {
                for dropped in request
                    .dependency_sources
                    .iter()
                    .filter(|s| !dependencies.contains_key(s.as_str()))
                {
                    debug!(module = %id, import = %dropped, "import no longer referenced");
                }
            }

            graph.add_module(id.clone(), path.clone());
            graph.set_dependencies(&id, &dependencies);

            result.dependency_map.insert(path.clone(), id.clone());
            result.modules.push(RawModule {
                content: self.scanner.rewrite(&source, &dependencies),
                id,
                path,
                dependencies,
            });
        }

        result.graph_size = result.modules.len();
        Ok(result)
    }

    fn module_removed(&self, id: &ModuleId) -> Vec<ModuleId> {
        match self.graph.lock() {
            Ok(mut graph) => {
                graph.mark_removed(id);
                graph.dependents(id)
            }
            Err(e) => {
                warn!(error = %e, "graph lock poisoned");
                Vec::new()
            }
        }
    }
}
