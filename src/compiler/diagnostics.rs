//! Compile error presentation for the browser console and overlay.

use regex::{Captures, Regex};
use std::path::Path;

use crate::error::{HotpackError, Result};
use crate::graph::DependencyMap;

const ERROR_MARK: &str = r#"<strong style="color: #dd4949;">&#x2718;</strong>"#;
const SPACE_HTML: &str = r#"<span style="display:inline-block;width:12px;"></span>"#;

/// Text for `CONSOLE_ERROR` and HTML for `MESSAGE_DIALOG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub console: String,
    pub dialog_html: String,
}

/// Turns raw compile errors into client-facing messages.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    sgr: Regex,
    any_escape: Regex,
}

impl Diagnostics {
    pub fn new() -> Result<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| HotpackError::Config(format!("{}: {}", pattern, e)))
        };
        Ok(Self {
            sgr: build(r"\x1b\[([0-9;]*)m")?,
            any_escape: build(r"\x1b\[[0-9;?]*[A-Za-z]")?,
        })
    }

    /// Build both client messages for an error raised while compiling `path`.
    pub fn report(&self, message: &str, path: &Path) -> ErrorReport {
        let console = self.strip_ansi(&format!("{}\n\nError in: {}", message, path.display()));

        let spaced = escape_html(message).replace(' ', SPACE_HTML);
        let body = self.ansi_to_html(&spaced).replace('\n', "<br />");
        let dialog_html = format!(
            "{mark} Error in: {path}<br />{mark} {body}",
            mark = ERROR_MARK,
            path = escape_html(&path.display().to_string()),
            body = body,
        );

        ErrorReport {
            console,
            dialog_html,
        }
    }

    pub fn strip_ansi(&self, text: &str) -> String {
        self.any_escape.replace_all(text, "").into_owned()
    }

    /// Convert SGR colour and weight codes to inline spans; drop the rest.
    pub fn ansi_to_html(&self, text: &str) -> String {
        let mut open = 0usize;
        let converted = self.sgr.replace_all(text, |caps: &Captures| {
            let mut out = String::new();
            for code in caps[1].split(';') {
                match code {
                    "" | "0" => {
                        out.push_str(&"</span>".repeat(open));
                        open = 0;
                    }
                    "22" | "39" => {
                        if open > 0 {
                            out.push_str("</span>");
                            open -= 1;
                        }
                    }
                    "1" => {
                        out.push_str(r#"<span style="font-weight:bold">"#);
                        open += 1;
                    }
                    other => {
                        if let Some(colour) = other.parse::<u8>().ok().and_then(foreground) {
                            out.push_str(&format!(r#"<span style="color:#{}">"#, colour));
                            open += 1;
                        }
                    }
                }
            }
            out
        });
        let mut html = self.strip_ansi(&converted);
        html.push_str(&"</span>".repeat(open));
        html
    }
}

/// Replace `_mod_<id>` references with the import strings they came from.
pub fn rewrite_module_refs(message: &str, dependencies: &DependencyMap) -> String {
    let mut out = message.to_string();
    for (source, id) in dependencies {
        let pattern = format!(r"{}\b", regex::escape(&id.slot()));
        if let Ok(re) = Regex::new(&pattern) {
            out = re.replace_all(&out, regex::NoExpand(source)).into_owned();
        }
    }
    out
}

fn foreground(code: u8) -> Option<&'static str> {
    Some(match code {
        30 | 90 => "000",
        31 | 91 => "ff0000",
        32 | 92 => "209805",
        33 | 93 => "e8bf03",
        34 | 94 => "0000ff",
        35 | 95 => "ff00ff",
        36 | 96 => "00ffee",
        37 | 97 => "f0f0f0",
        _ => return None,
    })
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
