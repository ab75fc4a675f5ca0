//! Client payload: the bootstrap HTML document and the module bundle it
//! embeds.
//!
//! The browser runtime (`runtime.js`) is compiled into the binary and
//! spliced into every bootstrap page after the module table.

use regex::Regex;
use std::collections::HashMap;

use crate::compiler::patch::MODULE_TABLE;
use crate::compiler::ModuleInit;
use crate::error::{HotpackError, Result};
use crate::graph::ModuleId;

/// Browser-side module loader and socket client.
pub const RUNTIME_JS: &str = include_str!("runtime.js");

/// WebSocket endpoint path on the dev server.
pub const SOCKET_PATH: &str = "/__hotpack/ws";

/// `</script` in any case; the slash is re-emitted escaped.
const SCRIPT_CLOSE_PATTERN: &str = r"(?i)<(/script)";

/// The module table embedded in bootstrap pages.
///
/// One initializer per module id: a newer body replaces the old one in
/// place, new ids append. Re-rendering without changes is byte-identical.
#[derive(Debug, Clone)]
pub struct EmbeddedBundle {
    modules: Vec<ModuleInit>,
    index: HashMap<ModuleId, usize>,
    watermark: u64,
    script_close: Regex,
}

impl EmbeddedBundle {
    pub fn new(initial: Vec<ModuleInit>) -> Result<Self> {
        let script_close = Regex::new(SCRIPT_CLOSE_PATTERN)
            .map_err(|e| HotpackError::Config(format!("script close pattern: {}", e)))?;
        let mut bundle = Self {
            modules: Vec::new(),
            index: HashMap::new(),
            watermark: 0,
            script_close,
        };
        for init in initial {
            bundle.upsert(init);
        }
        Ok(bundle)
    }

    /// Cache generation already reflected in the bundle.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Fold in initializers cached up to `generation`.
    pub fn embed(&mut self, inits: Vec<ModuleInit>, generation: u64) {
        for init in inits {
            self.upsert(init);
        }
        self.watermark = self.watermark.max(generation);
    }

    fn upsert(&mut self, init: ModuleInit) {
        match self.index.get(&init.id) {
            Some(&pos) => self.modules[pos] = init,
            None => {
                self.index.insert(init.id.clone(), self.modules.len());
                self.modules.push(init);
            }
        }
    }

    pub fn body_of(&self, id: &ModuleId) -> Option<&str> {
        self.index.get(id).map(|&pos| self.modules[pos].body.as_str())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Initializers as script text, safe to place inside `<script>`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for init in &self.modules {
            out.push('\n');
            out.push_str(&self.escape_script_close(&init.render()));
        }
        out
    }

    /// Break up `</script` so module text cannot end the tag early.
    fn escape_script_close(&self, text: &str) -> String {
        self.script_close.replace_all(text, r"<\${1}").into_owned()
    }
}

/// Render the full bootstrap page.
pub fn bootstrap_document(bundle: &EmbeddedBundle, port: u16, built_at: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>hotpack | DevServer</title>
</head>
<body>
<script id="hotpack-bundle">
/*
 * Bundled with hotpack v{version} ({built_at})
 * Mode: development
 */
;(function() {{
  var {table} = {{}};
{bundle}

  var devServerPort = "{port}";
  var devSocketPath = "{socket}";

{runtime}
}})();
</script>
</body>
</html>
"#,
        version = env!("CARGO_PKG_VERSION"),
        built_at = built_at,
        table = MODULE_TABLE,
        bundle = bundle.render(),
        port = port,
        socket = SOCKET_PATH,
        runtime = RUNTIME_JS,
    )
}
