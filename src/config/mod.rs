//! Build configuration (closure.toml)
//!
//! Layering, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. closure.toml
//! 3. CLI flags (applied by the binary on the returned builder)
//!
//! Relative paths in the file resolve against the file's directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pipeline::RemoteConfig;
use crate::request::{BuildRequestBuilder, OptimizationLevel, RequestError, WarningLevel, OUTPUT_PLACEHOLDER};
use crate::timeout::TimeoutConfig;

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "closure.toml";

/// Error types for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid build request: {0}")]
    Request(#[from] RequestError),
}

/// Local compiler locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Java launcher
    pub java: String,

    /// Script compiler jar
    pub script_compiler_jar: PathBuf,

    /// Template-to-script compiler jar
    pub template_compiler_jar: PathBuf,

    /// Runtime support script appended after compiled templates
    pub template_runtime: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            java: "java".to_string(),
            script_compiler_jar: PathBuf::from("compiler.jar"),
            template_compiler_jar: PathBuf::from("SoyToJsSrcCompiler.jar"),
            template_runtime: PathBuf::from("soyutils.js"),
        }
    }
}

/// Contents of closure.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Sources in compile order
    pub sources: Vec<PathBuf>,

    /// Directories whose `.js`/`.soy` files are appended after `sources`
    pub source_dirs: Vec<PathBuf>,

    pub externs: Vec<PathBuf>,

    /// Directories whose `.js` files are added as externs
    pub externs_dirs: Vec<PathBuf>,

    pub optimization: OptimizationLevel,

    pub warning_level: WarningLevel,

    pub use_library: bool,

    pub pretty_print: bool,

    pub local_compile: bool,

    /// Embed statistics, warnings and errors in the artifact
    pub debug: bool,

    /// Caching is disabled when unset
    pub cache_dir: Option<PathBuf>,

    pub code_url_prefix: Option<String>,

    /// Wrap output in the default anonymous function
    pub wrap_output: bool,

    /// Explicit wrapper; takes precedence over `wrap_output`
    pub output_wrapper: Option<String>,

    /// `Referer` sent to the compile service
    pub referer: Option<String>,

    pub tools: ToolConfig,

    pub remote: RemoteConfig,

    pub timeouts: TimeoutConfig,

    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            source_dirs: Vec::new(),
            externs: Vec::new(),
            externs_dirs: Vec::new(),
            optimization: OptimizationLevel::default(),
            warning_level: WarningLevel::default(),
            use_library: false,
            pretty_print: false,
            local_compile: false,
            debug: true,
            cache_dir: None,
            code_url_prefix: None,
            wrap_output: false,
            output_wrapper: None,
            referer: None,
            tools: ToolConfig::default(),
            remote: RemoteConfig::default(),
            timeouts: TimeoutConfig::default(),
            base_dir: None,
        }
    }
}

impl BuildConfig {
    /// Load and parse config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config = Self::from_str(&contents)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse config from a TOML string
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: BuildConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() && self.source_dirs.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one entry is required in 'sources' or 'source_dirs'".to_string(),
            ));
        }

        if let Some(ref wrapper) = self.output_wrapper {
            if !wrapper.contains(OUTPUT_PLACEHOLDER) {
                return Err(ConfigError::ValidationError(format!(
                    "'output_wrapper' must contain {}",
                    OUTPUT_PLACEHOLDER
                )));
            }
        }

        if self.remote.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "'remote.host' cannot be empty".to_string(),
            ));
        }
        if self.remote.port == 0 {
            return Err(ConfigError::ValidationError(
                "'remote.port' must be non-zero".to_string(),
            ));
        }
        if !self.remote.path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "'remote.path' must start with '/', got '{}'",
                self.remote.path
            )));
        }

        if self.tools.java.is_empty() {
            return Err(ConfigError::ValidationError(
                "'tools.java' cannot be empty".to_string(),
            ));
        }

        self.timeouts
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(())
    }

    /// Resolve a path from the file against `base_dir`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match self.base_dir {
            Some(ref base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Tool paths with relative jar and runtime paths resolved
    pub fn resolved_tools(&self) -> ToolConfig {
        ToolConfig {
            java: self.tools.java.clone(),
            script_compiler_jar: self.resolve(&self.tools.script_compiler_jar),
            template_compiler_jar: self.resolve(&self.tools.template_compiler_jar),
            template_runtime: self.resolve(&self.tools.template_runtime),
        }
    }

    /// Builder seeded from this file. Directory entries are scanned now.
    pub fn to_builder(&self) -> Result<BuildRequestBuilder, ConfigError> {
        let mut builder = BuildRequestBuilder::new()
            .optimization_level(self.optimization)
            .warning_level(self.warning_level)
            .use_library(self.use_library)
            .pretty_print(self.pretty_print)
            .local_compile(self.local_compile)
            .debug(self.debug);

        for source in &self.sources {
            builder = builder.add(self.resolve(source));
        }
        for dir in &self.source_dirs {
            builder = builder.add_dir(self.resolve(dir))?;
        }
        for extern_file in &self.externs {
            builder = builder.add_extern(self.resolve(extern_file));
        }
        for dir in &self.externs_dirs {
            builder = builder.add_externs_dir(self.resolve(dir))?;
        }

        if let Some(ref dir) = self.cache_dir {
            builder = builder.cache_dir(self.resolve(dir));
        }
        if let Some(ref prefix) = self.code_url_prefix {
            builder = builder.code_url_prefix(prefix.clone());
        }
        if let Some(ref base) = self.base_dir {
            builder = builder.source_root(base.clone());
        }
        if let Some(ref wrapper) = self.output_wrapper {
            builder = builder.output_wrapper(wrapper.clone());
        } else if self.wrap_output {
            builder = builder.wrap_output();
        }

        Ok(builder)
    }
}
