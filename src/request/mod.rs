//! Build request model
//!
//! A `BuildRequest` is the finalized description of one compilation: the
//! ordered source list, externs and compiler options. It is produced by
//! `BuildRequestBuilder` and never mutated afterwards.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wrapper used by `wrap_output()` when no template is given
pub const DEFAULT_OUTPUT_WRAPPER: &str = "(function(){%output%})();";

/// Placeholder the compiler replaces with the compiled code
pub const OUTPUT_PLACEHOLDER: &str = "%output%";

/// Extension of template sources handled by the template compiler
pub const TEMPLATE_EXTENSION: &str = "soy";

/// Extension of plain script sources
pub const SCRIPT_EXTENSION: &str = "js";

/// Errors raised while assembling a request
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no sources were added to the build")]
    EmptySources,

    #[error("output wrapper {0:?} does not contain the %output% placeholder")]
    InvalidOutputWrapper(String),

    #[error("invalid {kind}: {value:?}")]
    InvalidOption { kind: &'static str, value: String },

    #[error("failed to scan directory {}: {source}", dir.display())]
    ScanFailed {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Compiler optimisation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    /// Strip whitespace and comments only
    #[default]
    WhitespaceOnly,
    /// Local renaming and dead code removal
    Simple,
    /// Whole-program optimisation
    Advanced,
}

impl OptimizationLevel {
    /// Value passed to `--compilation_level` / `compilation_level`
    pub fn as_flag(&self) -> &'static str {
        match self {
            OptimizationLevel::WhitespaceOnly => "WHITESPACE_ONLY",
            OptimizationLevel::Simple => "SIMPLE_OPTIMIZATIONS",
            OptimizationLevel::Advanced => "ADVANCED_OPTIMIZATIONS",
        }
    }

    /// Map the short `mode` parameter (`w`, `s`, `a`) to a level.
    ///
    /// Anything else, including a missing parameter, selects whitespace-only.
    pub fn from_mode_param(param: Option<&str>) -> Self {
        match param {
            Some("s") => OptimizationLevel::Simple,
            Some("a") => OptimizationLevel::Advanced,
            _ => OptimizationLevel::WhitespaceOnly,
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

impl FromStr for OptimizationLevel {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "w" | "whitespace" | "whitespace_only" => Ok(OptimizationLevel::WhitespaceOnly),
            "s" | "simple" | "simple_optimizations" => Ok(OptimizationLevel::Simple),
            "a" | "advanced" | "advanced_optimizations" => Ok(OptimizationLevel::Advanced),
            _ => Err(RequestError::InvalidOption {
                kind: "optimization level",
                value: s.to_string(),
            }),
        }
    }
}

/// Compiler warning verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    Quiet,
    #[default]
    Default,
    Verbose,
}

impl WarningLevel {
    /// Value passed to `--warning_level` / `warning_level`
    pub fn as_flag(&self) -> &'static str {
        match self {
            WarningLevel::Quiet => "QUIET",
            WarningLevel::Default => "DEFAULT",
            WarningLevel::Verbose => "VERBOSE",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

impl FromStr for WarningLevel {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" => Ok(WarningLevel::Quiet),
            "default" => Ok(WarningLevel::Default),
            "verbose" => Ok(WarningLevel::Verbose),
            _ => Err(RequestError::InvalidOption {
                kind: "warning level",
                value: s.to_string(),
            }),
        }
    }
}

/// Finalized build configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    sources: Vec<PathBuf>,
    externs: Vec<PathBuf>,
    optimization_level: OptimizationLevel,
    warning_level: WarningLevel,
    use_library: bool,
    pretty_print: bool,
    local_compile: bool,
    debug: bool,
    cache_directory: Option<PathBuf>,
    code_url_prefix: Option<String>,
    source_root: Option<PathBuf>,
    output_wrapper: Option<String>,
}

impl BuildRequest {
    pub fn builder() -> BuildRequestBuilder {
        BuildRequestBuilder::new()
    }

    /// Sources in compile order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn externs(&self) -> &[PathBuf] {
        &self.externs
    }

    pub fn optimization_level(&self) -> OptimizationLevel {
        self.optimization_level
    }

    pub fn warning_level(&self) -> WarningLevel {
        self.warning_level
    }

    pub fn use_library(&self) -> bool {
        self.use_library
    }

    pub fn pretty_print(&self) -> bool {
        self.pretty_print
    }

    pub fn local_compile(&self) -> bool {
        self.local_compile
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn cache_directory(&self) -> Option<&Path> {
        self.cache_directory.as_deref()
    }

    pub fn code_url_prefix(&self) -> Option<&str> {
        self.code_url_prefix.as_deref()
    }

    pub fn output_wrapper(&self) -> Option<&str> {
        self.output_wrapper.as_deref()
    }

    /// Path of `source` as appended to the code URL prefix.
    ///
    /// Sources under the source root are made relative to it and joined
    /// with `/`; anything else is used as given.
    pub fn source_url_path(&self, source: &Path) -> String {
        let relative = self
            .source_root
            .as_deref()
            .and_then(|root| source.strip_prefix(root).ok());
        match relative {
            Some(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            None => source.to_string_lossy().into_owned(),
        }
    }

    /// Split sources into (templates, scripts), each keeping list order.
    pub fn partition_sources(&self) -> (Vec<&Path>, Vec<&Path>) {
        self.sources
            .iter()
            .map(PathBuf::as_path)
            .partition(|p| is_template(p))
    }
}

/// Returns true for template sources (`.soy`).
pub fn is_template(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION)
}

/// Accumulates sources and options for a `BuildRequest`
#[derive(Debug, Clone)]
pub struct BuildRequestBuilder {
    sources: Vec<PathBuf>,
    externs: Vec<PathBuf>,
    optimization_level: OptimizationLevel,
    warning_level: WarningLevel,
    use_library: bool,
    pretty_print: bool,
    local_compile: bool,
    debug: bool,
    cache_directory: Option<PathBuf>,
    code_url_prefix: Option<String>,
    source_root: Option<PathBuf>,
    output_wrapper: Option<String>,
}

impl Default for BuildRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildRequestBuilder {
    /// Defaults: whitespace-only, default warnings, remote compile, debug on,
    /// caching off.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            externs: Vec::new(),
            optimization_level: OptimizationLevel::default(),
            warning_level: WarningLevel::default(),
            use_library: false,
            pretty_print: false,
            local_compile: false,
            debug: true,
            cache_directory: None,
            code_url_prefix: None,
            source_root: None,
            output_wrapper: None,
        }
    }

    /// Append a source. Sources are compiled in the order they are added.
    pub fn add(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    /// Append every `.js` and `.soy` file directly inside `dir`, by name.
    pub fn add_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, RequestError> {
        let found = scan_dir(dir.as_ref(), &[SCRIPT_EXTENSION, TEMPLATE_EXTENSION])?;
        self.sources.extend(found);
        Ok(self)
    }

    pub fn add_extern(mut self, path: impl Into<PathBuf>) -> Self {
        self.externs.push(path.into());
        self
    }

    /// Add every `.js` file directly inside `dir` as an extern.
    pub fn add_externs_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, RequestError> {
        let found = scan_dir(dir.as_ref(), &[SCRIPT_EXTENSION])?;
        self.externs.extend(found);
        Ok(self)
    }

    /// Enable caching in `dir`.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(dir.into());
        self
    }

    /// Reference sources as `prefix + path` instead of posting their contents.
    pub fn code_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.code_url_prefix = Some(prefix.into());
        self
    }

    /// Directory that code URL paths are relative to.
    pub fn source_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_root = Some(dir.into());
        self
    }

    /// Wrap output in an anonymous function.
    pub fn wrap_output(self) -> Self {
        self.output_wrapper(DEFAULT_OUTPUT_WRAPPER)
    }

    pub fn output_wrapper(mut self, template: impl Into<String>) -> Self {
        self.output_wrapper = Some(template.into());
        self
    }

    pub fn use_library(mut self, enabled: bool) -> Self {
        self.use_library = enabled;
        self
    }

    pub fn pretty_print(mut self, enabled: bool) -> Self {
        self.pretty_print = enabled;
        self
    }

    pub fn local_compile(mut self, enabled: bool) -> Self {
        self.local_compile = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Drop statistics, warnings and errors from the served artifact.
    pub fn hide_debug_info(self) -> Self {
        self.debug(false)
    }

    pub fn optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn whitespace_only(self) -> Self {
        self.optimization_level(OptimizationLevel::WhitespaceOnly)
    }

    pub fn simple_mode(self) -> Self {
        self.optimization_level(OptimizationLevel::Simple)
    }

    pub fn advanced_mode(self) -> Self {
        self.optimization_level(OptimizationLevel::Advanced)
    }

    /// Select the level from a `mode` query parameter (`w`, `s`, `a`).
    pub fn mode_from_param(self, param: Option<&str>) -> Self {
        self.optimization_level(OptimizationLevel::from_mode_param(param))
    }

    pub fn warning_level(mut self, level: WarningLevel) -> Self {
        self.warning_level = level;
        self
    }

    pub fn quiet(self) -> Self {
        self.warning_level(WarningLevel::Quiet)
    }

    pub fn default_warnings(self) -> Self {
        self.warning_level(WarningLevel::Default)
    }

    pub fn verbose(self) -> Self {
        self.warning_level(WarningLevel::Verbose)
    }

    /// Finalize the request.
    ///
    /// Externs are a set: duplicates are dropped, first occurrence wins.
    pub fn build(self) -> Result<BuildRequest, RequestError> {
        if self.sources.is_empty() {
            return Err(RequestError::EmptySources);
        }

        if let Some(ref wrapper) = self.output_wrapper {
            if !wrapper.contains(OUTPUT_PLACEHOLDER) {
                return Err(RequestError::InvalidOutputWrapper(wrapper.clone()));
            }
        }

        let mut externs: Vec<PathBuf> = Vec::with_capacity(self.externs.len());
        for path in self.externs {
            if !externs.contains(&path) {
                externs.push(path);
            }
        }

        Ok(BuildRequest {
            sources: self.sources,
            externs,
            optimization_level: self.optimization_level,
            warning_level: self.warning_level,
            use_library: self.use_library,
            pretty_print: self.pretty_print,
            local_compile: self.local_compile,
            debug: self.debug,
            cache_directory: self.cache_directory,
            code_url_prefix: self.code_url_prefix.filter(|p| !p.is_empty()),
            source_root: self.source_root,
            output_wrapper: self.output_wrapper,
        })
    }
}

/// Non-recursive scan for regular files with one of `extensions`.
///
/// Names starting with `._` (resource-fork backups) are skipped. Results are
/// sorted so the compile order does not depend on directory iteration order.
fn scan_dir(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, RequestError> {
    let scan_err = |source| RequestError::ScanFailed {
        dir: dir.to_path_buf(),
        source,
    };

    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        // Follows symlinks; dangling links are skipped
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("._") {
            continue;
        }

        let wanted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext));
        if wanted {
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}
