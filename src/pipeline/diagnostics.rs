//! Diagnostics and the console preamble embedded in debug artifacts

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Artifact served in place of a failed compile when debug output is off
pub const FALLBACK_ARTIFACT: &str = "window.console.error('Unexpected error');";

/// Pipeline stage a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Template-to-script compiler
    Template,
    /// Script compiler
    Script,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Template => f.write_str("template compiler"),
            Stage::Script => f.write_str("script compiler"),
        }
    }
}

/// A failed compiler invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub stage: Stage,
    /// Command line as run
    pub command: String,
    /// Non-empty, trimmed stderr lines
    pub lines: Vec<String>,
}

impl Diagnostic {
    pub fn new(stage: Stage, command: impl Into<String>, stderr: &str) -> Self {
        let lines = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            stage,
            command: command.into(),
            lines,
        }
    }

    /// Diagnostic without compiler output (spawn failure, timeout, exit code)
    pub fn with_reason(stage: Stage, command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage,
            command: command.into(),
            lines: vec![reason.into()],
        }
    }

    /// One `window.console.error(...)` statement per line, CRLF separated.
    pub fn to_script(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("window.console.error('{}');", escape_js_string(line)))
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.command)?;
        for line in &self.lines {
            write!(f, "\n  {}", line)?;
        }
        Ok(())
    }
}

/// Escape `s` for use inside a single-quoted script string literal.
pub fn escape_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

/// Size and timing figures reported by the remote service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub original_size: String,
    pub original_gzip_size: String,
    pub compressed_size: String,
    pub compressed_gzip_size: String,
    pub compile_time: String,
}

/// A warning or error reported by the remote service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerMessage {
    pub kind: String,
    pub description: String,
    pub lineno: String,
    pub charno: String,
    pub line: String,
}

impl CompilerMessage {
    fn to_console(&self, level: &str) -> String {
        format!(
            "window.console.{}('{}: {}\\nLine: {}\\nChar: {}\\nLine: {}');\r\n",
            level,
            escape_js_string(&self.kind),
            escape_js_string(&self.description),
            escape_js_string(&self.lineno),
            escape_js_string(&self.charno),
            escape_js_string(&self.line),
        )
    }
}

/// Guarded console block prepended to remote artifacts in debug mode.
pub fn debug_preamble(
    stats: &Statistics,
    errors: &[CompilerMessage],
    warnings: &[CompilerMessage],
    generated: DateTime<Utc>,
) -> String {
    let mut out = String::from("if(window.console&&window.console.log){\r\n");
    out.push_str(&format!(
        "window.console.log('Closure Compiler Stats:\\n\
         -----------------------\\n\
         Original Size: {}\\n\
         Original Gzip Size: {}\\n\
         Compressed Size: {}\\n\
         Compressed Gzip Size: {}\\n\
         Compile Time: {}\\n\
         Generated: {}');\r\n",
        escape_js_string(&stats.original_size),
        escape_js_string(&stats.original_gzip_size),
        escape_js_string(&stats.compressed_size),
        escape_js_string(&stats.compressed_gzip_size),
        escape_js_string(&stats.compile_time),
        generated.format("%Y/%m/%d %H:%M:%S UTC"),
    ));
    for error in errors {
        out.push_str(&error.to_console("error"));
    }
    for warning in warnings {
        out.push_str(&warning.to_console("warn"));
    }
    out.push_str("}\r\n\r\n");
    out
}
