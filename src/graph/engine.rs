//! Module graph engine backed by petgraph.
//!
//! Nodes are modules, edges point from an importer to the module it imports
//! and carry the import source string. Reversed edges answer "who imports
//! this module" without a separate index.

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::{DependencyMap, GraphStats, ModuleId, ModuleRecord};

/// A module node in the graph.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: ModuleId,
    pub path: PathBuf,
    /// Soft-delete marker set when the source file disappears.
    pub removed: bool,
}

/// The host-side module graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    graph: StableDiGraph<ModuleNode, String>,
    by_id: HashMap<ModuleId, NodeIndex>,
    by_path: HashMap<PathBuf, NodeIndex>,
    next_id: u64,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from module records (typically the initial snapshot).
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ModuleRecord>) -> Self {
        let records: Vec<&ModuleRecord> = records.into_iter().collect();
        let mut graph = Self::new();
        for record in &records {
            graph.add_module(record.id.clone(), record.path.clone());
        }
        for record in &records {
            graph.set_dependencies(&record.id, &record.dependencies);
        }
        graph
    }

    /// Insert a module or update the path of an existing one.
    pub fn add_module(&mut self, id: ModuleId, path: PathBuf) -> NodeIndex {
        if let Ok(n) = id.as_str().parse::<u64>() {
            self.next_id = self.next_id.max(n + 1);
        }

        if let Some(&idx) = self.by_id.get(&id) {
            let old_path = self.graph[idx].path.clone();
            self.by_path.remove(&old_path);
            self.by_path.insert(path.clone(), idx);
            let node = &mut self.graph[idx];
            node.path = path;
            node.removed = false;
            return idx;
        }

        let idx = self.graph.add_node(ModuleNode {
            id: id.clone(),
            path: path.clone(),
            removed: false,
        });
        self.by_id.insert(id, idx);
        self.by_path.insert(path, idx);
        idx
    }

    /// Replace the outgoing edges of `id` with `dependencies`.
    ///
    /// Targets that are not in the graph are skipped.
    pub fn set_dependencies(&mut self, id: &ModuleId, dependencies: &DependencyMap) {
        let Some(&src) = self.by_id.get(id) else {
            return;
        };

        let outgoing: Vec<_> = self
            .graph
            .edges_directed(src, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in outgoing {
            self.graph.remove_edge(edge);
        }

        for (source, target) in dependencies {
            match self.by_id.get(target) {
                Some(&dst) => {
                    self.graph.add_edge(src, dst, source.clone());
                }
                None => debug!(module = %id, import = %source, "skipping edge to unknown module"),
            }
        }
    }

    /// Allocate an identifier no module in this graph uses yet.
    pub fn allocate_id(&mut self) -> ModuleId {
        loop {
            let candidate = ModuleId::from(self.next_id);
            self.next_id += 1;
            if !self.by_id.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn id_for_path(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).map(|&idx| self.graph[idx].id.clone())
    }

    pub fn path_of(&self, id: &ModuleId) -> Option<&Path> {
        self.by_id.get(id).map(|&idx| self.graph[idx].path.as_path())
    }

    /// Modules that import `id`, in no particular order.
    pub fn dependents(&self, id: &ModuleId) -> Vec<ModuleId> {
        let Some(&idx) = self.by_id.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<ModuleId> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| &self.graph[e.source()])
            .filter(|node| !node.removed)
            .map(|node| node.id.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Import source → target id for `id`'s current edges.
    pub fn dependencies(&self, id: &ModuleId) -> DependencyMap {
        let Some(&idx) = self.by_id.get(id) else {
            return DependencyMap::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.weight().clone(), self.graph[e.target()].id.clone()))
            .collect()
    }

    /// Mark a module removed. Its edges stay so importers remain visible.
    pub fn mark_removed(&mut self, id: &ModuleId) {
        if let Some(&idx) = self.by_id.get(id) {
            self.graph[idx].removed = true;
        }
    }

    pub fn is_removed(&self, id: &ModuleId) -> bool {
        self.by_id
            .get(id)
            .map_or(false, |&idx| self.graph[idx].removed)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            module_count: self
                .graph
                .node_indices()
                .filter(|&idx| !self.graph[idx].removed)
                .count(),
            edge_count: self.graph.edge_count(),
            root_present: self.contains(&ModuleId::root()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, path: &str, deps: &[(&str, &str)]) -> ModuleRecord {
        ModuleRecord {
            id: ModuleId::from(id),
            path: PathBuf::from(path),
            content: String::new(),
            dependencies: deps
                .iter()
                .map(|(s, t)| (s.to_string(), ModuleId::from(*t)))
                .collect(),
        }
    }

    fn sample() -> ModuleGraph {
        let records = vec![
            record("root", "/p/index.js", &[("./a", "1"), ("./b", "2")]),
            record("1", "/p/a.js", &[("./b", "2")]),
            record("2", "/p/b.js", &[]),
        ];
        ModuleGraph::from_records(&records)
    }

    #[test]
    fn test_dependents_follow_reversed_edges() {
        let graph = sample();
        let importers = graph.dependents(&ModuleId::from("2"));
        assert_eq!(importers, vec![ModuleId::from("1"), ModuleId::root()]);
        assert!(graph.dependents(&ModuleId::root()).is_empty());
    }

    #[test]
    fn test_set_dependencies_replaces_edges() {
        let mut graph = sample();
        let mut deps = DependencyMap::new();
        deps.insert("./b".to_string(), ModuleId::from("2"));
        graph.set_dependencies(&ModuleId::root(), &deps);

        assert_eq!(graph.dependencies(&ModuleId::root()), deps);
        assert_eq!(graph.dependents(&ModuleId::from("1")), Vec::<ModuleId>::new());
        assert_eq!(graph.stats().edge_count, 2);
    }

    #[test]
    fn test_allocate_id_skips_numeric_ids_in_use() {
        let mut graph = sample();
        let id = graph.allocate_id();
        assert_eq!(id, ModuleId::from("3"));
        assert_ne!(graph.allocate_id(), id);
    }

    #[test]
    fn test_removed_modules_drop_out_of_dependents_and_stats() {
        let mut graph = sample();
        graph.mark_removed(&ModuleId::from("1"));

        assert!(graph.is_removed(&ModuleId::from("1")));
        assert_eq!(graph.dependents(&ModuleId::from("2")), vec![ModuleId::root()]);
        assert_eq!(graph.stats().module_count, 2);
        assert!(graph.stats().root_present);
    }

    #[test]
    fn test_path_lookup() {
        let graph = sample();
        assert_eq!(graph.id_for_path(Path::new("/p/a.js")), Some(ModuleId::from("1")));
        assert_eq!(graph.path_of(&ModuleId::root()), Some(Path::new("/p/index.js")));
        assert_eq!(graph.id_for_path(Path::new("/p/missing.js")), None);
    }
}
