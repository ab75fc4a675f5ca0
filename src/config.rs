//! Dev server configuration, read from `hotpack.toml`.
//!
//! Every field has a default so an empty file (or no file) is valid. Keys
//! may be written in snake_case or in the camelCase used by bundler plugin
//! configs (`devServerPort`, `watchFiles`, ...).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::compiler::TransformOptions;
use crate::daemon::SocketErrorPolicy;
use crate::error::{HotpackError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "hotpack.toml";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STABILITY_MS: u64 = 50;
pub const DEFAULT_EXCLUDE: &str = "node_modules";
pub const DEFAULT_PUBLIC_PATH: &str = "./dist";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Preferred port; an ephemeral one is used if it is taken. 0 = always ephemeral.
    #[serde(alias = "devServerPort")]
    pub dev_server_port: u16,
    #[serde(alias = "watchFiles")]
    pub watch_files: bool,
    /// Forward dialogs and console messages to the browser.
    #[serde(alias = "clientSideLogs")]
    pub client_side_logs: bool,
    /// Static asset root. Must exist when set explicitly.
    #[serde(alias = "publicPath")]
    pub public_path: Option<PathBuf>,
    /// Quiet period after the last write before a change is dispatched.
    #[serde(alias = "stabilityMs")]
    pub stability_ms: u64,
    #[serde(alias = "socketErrorPolicy")]
    pub socket_error_policy: SocketErrorPolicy,
    /// Where to write each regenerated subgraph, for debugging.
    #[serde(alias = "graphDump")]
    pub graph_dump: Option<PathBuf>,
    pub transformer: TransformerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Directory to watch. Defaults to the working directory.
    pub include: Option<PathBuf>,
    /// Regex of paths to ignore. Defaults to `node_modules`.
    pub exclude: Option<String>,
    #[serde(alias = "babelPresets")]
    pub presets: Vec<String>,
    #[serde(alias = "babelPlugins")]
    pub plugins: Vec<String>,
    /// External transform command; the source is passed through unchanged if unset.
    pub command: Option<String>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            dev_server_port: DEFAULT_PORT,
            watch_files: false,
            client_side_logs: true,
            public_path: None,
            stability_ms: DEFAULT_STABILITY_MS,
            socket_error_policy: SocketErrorPolicy::default(),
            graph_dump: None,
            transformer: TransformerConfig::default(),
        }
    }
}

impl DevConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| HotpackError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| HotpackError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_ms)
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            presets: self.transformer.presets.clone(),
            plugins: self.transformer.plugins.clone(),
        }
    }

    pub fn watch_root(&self, cwd: &Path) -> PathBuf {
        match &self.transformer.include {
            Some(include) if include.is_absolute() => include.clone(),
            Some(include) => cwd.join(include),
            None => cwd.to_path_buf(),
        }
    }

    pub fn exclude_pattern(&self) -> Result<Regex> {
        let pattern = self
            .transformer
            .exclude
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_EXCLUDE);
        Regex::new(pattern).map_err(|e| HotpackError::Config(format!("transformer.exclude: {}", e)))
    }

    /// Resolve the static asset root. An explicitly configured directory
    /// that does not exist is a fatal configuration error.
    pub fn resolve_public_path(&self, cwd: &Path) -> Result<PathBuf> {
        match &self.public_path {
            Some(path) => {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    cwd.join(path)
                };
                if !resolved.is_dir() {
                    return Err(HotpackError::Config(format!(
                        "public path {} does not exist",
                        resolved.display()
                    )));
                }
                Ok(resolved)
            }
            None => Ok(cwd.join(DEFAULT_PUBLIC_PATH)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DevConfig::from_toml_str("").unwrap();
        assert_eq!(config, DevConfig::default());
        assert_eq!(config.dev_server_port, 3000);
        assert!(config.client_side_logs);
        assert!(!config.watch_files);
        assert_eq!(config.socket_error_policy, SocketErrorPolicy::FailFast);
    }

    #[test]
    fn test_camel_case_keys_are_accepted() {
        let config = DevConfig::from_toml_str(
            r#"
devServerPort = 4000
watchFiles = true
clientSideLogs = false
socket_error_policy = "isolate"

[transformer]
exclude = "vendor"
babelPresets = ["env"]
"#,
        )
        .unwrap();
        assert_eq!(config.dev_server_port, 4000);
        assert!(config.watch_files);
        assert!(!config.client_side_logs);
        assert_eq!(config.socket_error_policy, SocketErrorPolicy::Isolate);
        assert_eq!(config.transform_options().presets, vec!["env".to_string()]);
        assert!(config.exclude_pattern().unwrap().is_match("/p/vendor/x.js"));
    }

    #[test]
    fn test_default_exclude_is_node_modules() {
        let re = DevConfig::default().exclude_pattern().unwrap();
        assert!(re.is_match("/p/node_modules/react/index.js"));
        assert!(!re.is_match("/p/src/index.js"));
    }

    #[test]
    fn test_invalid_exclude_is_config_error() {
        let mut config = DevConfig::default();
        config.transformer.exclude = Some("(".to_string());
        assert!(matches!(config.exclude_pattern(), Err(HotpackError::Config(_))));
    }

    #[test]
    fn test_explicit_public_path_must_exist() {
        let dir = tempdir().unwrap();
        let mut config = DevConfig::default();
        assert_eq!(
            config.resolve_public_path(dir.path()).unwrap(),
            dir.path().join("./dist")
        );

        config.public_path = Some(PathBuf::from("out"));
        assert!(config.resolve_public_path(dir.path()).is_err());

        fs::create_dir(dir.path().join("out")).unwrap();
        assert_eq!(config.resolve_public_path(dir.path()).unwrap(), dir.path().join("out"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = DevConfig::load_or_default(&dir.path().join("hotpack.toml")).unwrap();
        assert_eq!(config, DevConfig::default());
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(DevConfig::from_toml_str(r#"socket_error_policy = "retry""#).is_err());
    }
}
