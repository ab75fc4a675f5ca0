//! Socket protocol: update events pushed from the dev server to browsers.
//!
//! One JSON object per WebSocket text frame, tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::compiler::Patch;
use crate::error::Result;
use crate::graph::ModuleId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpdateEvent {
    /// Redefine one or more module initializers, then reload.
    #[serde(rename = "MODULE_UPDATE")]
    ModuleUpdate {
        #[serde(rename = "subsequentBundle")]
        subsequent_bundle: String,
    },

    /// Replace a deleted module with a stub exporting `null`, then reload.
    #[serde(rename = "MODULE_UNLINK")]
    ModuleUnlink {
        #[serde(rename = "modId")]
        mod_id: ModuleId,
    },

    /// Sanitized HTML for the full-screen overlay.
    #[serde(rename = "MESSAGE_DIALOG")]
    MessageDialog { msg: String },

    #[serde(rename = "CONSOLE_LOG")]
    ConsoleLog { msg: String },

    #[serde(rename = "CONSOLE_ERROR")]
    ConsoleError { msg: String },
}

impl UpdateEvent {
    pub fn module_update(patch: &Patch) -> Self {
        UpdateEvent::ModuleUpdate {
            subsequent_bundle: patch.render(),
        }
    }

    pub fn unlink(id: ModuleId) -> Self {
        UpdateEvent::ModuleUnlink { mod_id: id }
    }

    pub fn dialog(html: impl Into<String>) -> Self {
        UpdateEvent::MessageDialog { msg: html.into() }
    }

    pub fn log(msg: impl Into<String>) -> Self {
        UpdateEvent::ConsoleLog { msg: msg.into() }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        UpdateEvent::ConsoleError { msg: msg.into() }
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateEvent::ModuleUpdate { .. } => "MODULE_UPDATE",
            UpdateEvent::ModuleUnlink { .. } => "MODULE_UNLINK",
            UpdateEvent::MessageDialog { .. } => "MESSAGE_DIALOG",
            UpdateEvent::ConsoleLog { .. } => "CONSOLE_LOG",
            UpdateEvent::ConsoleError { .. } => "CONSOLE_ERROR",
        }
    }

    /// Dialog and console events are only sent when client-side logs are on.
    pub fn is_client_log(&self) -> bool {
        matches!(
            self,
            UpdateEvent::MessageDialog { .. }
                | UpdateEvent::ConsoleLog { .. }
                | UpdateEvent::ConsoleError { .. }
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
