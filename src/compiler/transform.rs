//! Source transform capability.
//!
//! The build pipeline decides how raw module source becomes executable
//! code. The compiler only needs `content -> code`.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::{HotpackError, Result};

/// Options forwarded to the transform unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformOptions {
    #[serde(default)]
    pub presets: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub code: String,
}

pub trait SourceTransform: Send + Sync {
    fn transform(&self, content: &str, options: &TransformOptions) -> Result<TransformOutput>;
}

/// Returns the source unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl SourceTransform for Passthrough {
    fn transform(&self, content: &str, _options: &TransformOptions) -> Result<TransformOutput> {
        Ok(TransformOutput {
            code: content.to_string(),
        })
    }
}

/// Pipes the source through an external command.
///
/// The source goes to stdin and the code is read from stdout. Presets and
/// plugins are exported as `HOTPACK_PRESETS` / `HOTPACK_PLUGINS`
/// (comma separated). A non-zero exit is a transform error carrying stderr.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    program: String,
    args: Vec<String>,
}

impl CommandTransform {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line on whitespace. Quoting is not supported.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| HotpackError::Config("transform command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }
}

impl SourceTransform for CommandTransform {
    fn transform(&self, content: &str, options: &TransformOptions) -> Result<TransformOutput> {
        debug!(program = %self.program, bytes = content.len(), "running transform command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("HOTPACK_PRESETS", options.presets.join(","))
            .env("HOTPACK_PLUGINS", options.plugins.join(","))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HotpackError::Transform(format!("{}: {}", self.program, e)))?;

        // Feed stdin from a separate thread so a large module cannot
        // deadlock against a full stdout pipe.
        let stdin = child.stdin.take();
        let input = content.to_string();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input.as_bytes())?;
            }
            Ok(())
        });

        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| HotpackError::Transform("stdin writer panicked".to_string()))??;
        if !output.status.success() {
            return Err(HotpackError::Transform(
                String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            ));
        }

        let code = String::from_utf8(output.stdout)
            .map_err(|e| HotpackError::Transform(format!("non UTF-8 output: {}", e)))?;
        Ok(TransformOutput { code })
    }
}
