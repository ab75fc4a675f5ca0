//! Core types for the module graph.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Stable identifier of a module within one dev session.
///
/// Hosts hand out either string or integer ids; both normalize to a string
/// so `"3"` and `3` name the same module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(String);

/// Identifier of the entry module the client runtime re-requires on reload.
pub const ROOT_MODULE: &str = "root";

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn root() -> Self {
        Self(ROOT_MODULE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the initializer slot in the client module table.
    pub fn slot(&self) -> String {
        format!("_mod_{}", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for ModuleId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => ModuleId(s),
            RawId::Number(n) => ModuleId(n.to_string()),
        })
    }
}

/// Import source string → resolved module id.
pub type DependencyMap = BTreeMap<String, ModuleId>;

/// Absolute source path → module id, used to translate watcher events.
pub type PathIndex = HashMap<PathBuf, ModuleId>;

/// A compiled module as held by the module cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub path: PathBuf,
    /// Executable body, already transformed.
    pub content: String,
    #[serde(default)]
    pub dependencies: DependencyMap,
}

/// A module as produced by the host before the source transform runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawModule {
    pub id: ModuleId,
    pub path: PathBuf,
    pub content: String,
    #[serde(default)]
    pub dependencies: DependencyMap,
}

/// Graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub module_count: usize,
    pub edge_count: usize,
    pub root_present: bool,
}
