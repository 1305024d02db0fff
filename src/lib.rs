//! closure-cache - cached Closure Compiler builds
//!
//! This crate assembles script and template sources into a build request,
//! compiles them with a local compiler pipeline or the remote compile
//! service, caches the artifact under a fingerprint of its inputs and
//! serves it with Last-Modified / ETag / 304 semantics.

pub mod cache;
pub mod config;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod timeout;

pub use cache::{fingerprint, CacheEntry, CacheError, CacheMetadata, CacheStore};
pub use config::{BuildConfig, ConfigError, ToolConfig};
pub use pipeline::{CompileResult, CompilerPipeline, Diagnostic, PipelineError};
pub use request::{BuildRequest, BuildRequestBuilder, OptimizationLevel, RequestError, WarningLevel};
pub use response::{ResponseNode, ResponseTreeParser, XmlTreeParser};
pub use server::{ArtifactServer, ConditionalRequest, ServeError, ServeOutcome};
pub use timeout::TimeoutConfig;
