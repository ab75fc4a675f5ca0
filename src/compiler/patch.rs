//! Patch serialization.
//!
//! A patch is an ordered list of module initializers. It renders to the
//! single evaluable text blob the client runtime `eval`s, but stays a
//! structured value until then so patch generation can be inspected
//! without executing anything.

use serde::Serialize;

use crate::graph::ModuleId;

/// Name of the module table inside the bootstrap closure.
pub const MODULE_TABLE: &str = "__hotpackModules";

/// Body installed for a module whose source file was deleted.
pub const UNLINKED_BODY: &str = "module.exports = null;";

/// One `moduleInit(moduleId) { body }` definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInit {
    pub id: ModuleId,
    pub body: String,
}

impl ModuleInit {
    pub fn new(id: ModuleId, body: impl Into<String>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    pub fn unlinked(id: ModuleId) -> Self {
        Self::new(id, UNLINKED_BODY)
    }

    pub fn render(&self) -> String {
        format!(
            "{}.{} = function(require, module, exports) {{{}\n}};",
            MODULE_TABLE,
            self.id.slot(),
            self.body
        )
    }
}

/// A "subsequent bundle": initializers to (re)define on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Patch {
    pub modules: Vec<ModuleInit>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, init: ModuleInit) {
        self.modules.push(init);
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.iter().any(|m| &m.id == id)
    }

    pub fn body_of(&self, id: &ModuleId) -> Option<&str> {
        self.modules
            .iter()
            .rev()
            .find(|m| &m.id == id)
            .map(|m| m.body.as_str())
    }

    /// Concatenate every initializer, one per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for init in &self.modules {
            out.push('\n');
            out.push_str(&init.render());
        }
        out
    }
}
