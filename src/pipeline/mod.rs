//! Compiler pipeline
//!
//! Produces an artifact for a `BuildRequest` through one of two mutually
//! exclusive paths:
//!
//! 1. Local: template compiler (when `.soy` sources exist), then the script
//!    compiler, both as subprocesses
//! 2. Remote: form POST to the compile service, reply parsed into a
//!    `ResponseNode` tree
//!
//! Subprocess failures are recoverable: with `debug` they surface as
//! `CompileResult::Failure`, otherwise as the fallback artifact. Network and
//! protocol failures propagate as `PipelineError`.

pub mod diagnostics;
pub mod local;
pub mod process;
pub mod remote;

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use closure_wire::{HttpClient, WireError};
use log::{error, info};
use thiserror::Error;

use crate::config::ToolConfig;
use crate::request::BuildRequest;
use crate::response::{ParseError, ResponseTreeParser, XmlTreeParser};
use crate::timeout::TimeoutConfig;

pub use diagnostics::{Diagnostic, Stage, FALLBACK_ARTIFACT};
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, SystemRunner};
pub use remote::{CompileTransport, HttpTransport, RemoteConfig, RemoteOutput};

use local::LocalOutcome;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read source {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("network error: {0}")]
    Network(WireError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),
}

impl From<WireError> for PipelineError {
    fn from(err: WireError) -> Self {
        if err.is_protocol() {
            PipelineError::Protocol(err.to_string())
        } else {
            PipelineError::Network(err)
        }
    }
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::SourceRead { .. } => 1,
            PipelineError::Network(_) => 20,
            PipelineError::Protocol(_) => 30,
            PipelineError::Parse(_) => 30,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Output of one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    Success(Vec<u8>),
    Failure(Diagnostic),
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Success(_))
    }
}

/// Runs the local or remote compile for a request
pub struct CompilerPipeline {
    tools: ToolConfig,
    runner: Box<dyn ProcessRunner>,
    transport: Box<dyn CompileTransport>,
    parser: Box<dyn ResponseTreeParser>,
    referer: Option<String>,
}

impl CompilerPipeline {
    /// Pipeline with the system process runner, the raw HTTP transport and
    /// the XML reply parser.
    pub fn new(tools: ToolConfig, timeouts: &TimeoutConfig, remote: RemoteConfig) -> Self {
        let client = HttpClient::new(timeouts.client_config());
        Self {
            tools,
            runner: Box::new(SystemRunner::new(timeouts.compile_timeout())),
            transport: Box::new(HttpTransport::new(client, remote)),
            parser: Box::new(XmlTreeParser),
            referer: None,
        }
    }

    pub fn with_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn with_transport(mut self, transport: impl CompileTransport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    pub fn with_parser(mut self, parser: impl ResponseTreeParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// `Referer` sent to the compile service
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer.filter(|r| !r.is_empty());
        self
    }

    pub fn tools(&self) -> &ToolConfig {
        &self.tools
    }

    /// Compile `req`, selecting the path from `req.local_compile()`.
    pub fn compile(&self, req: &BuildRequest) -> PipelineResult<CompileResult> {
        if req.local_compile() {
            return Ok(self.compile_local(req));
        }

        self.compile_remote(req).map_err(|e| {
            error!("remote compile failed: {}", e);
            e
        })
    }

    fn compile_local(&self, req: &BuildRequest) -> CompileResult {
        let scratch_dir = req
            .cache_directory()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);

        match local::compile(req, &self.tools, self.runner.as_ref(), &scratch_dir) {
            LocalOutcome::Compiled(bytes) => {
                info!("compiled {} sources locally ({} bytes)", req.sources().len(), bytes.len());
                CompileResult::Success(bytes)
            }
            LocalOutcome::Failed(diag) => {
                error!("{}", diag);
                if req.debug() {
                    CompileResult::Failure(diag)
                } else {
                    CompileResult::Success(FALLBACK_ARTIFACT.as_bytes().to_vec())
                }
            }
        }
    }

    fn compile_remote(&self, req: &BuildRequest) -> PipelineResult<CompileResult> {
        let params = remote::build_params(req)?;
        let body = self.transport.submit(&params, self.referer.as_deref())?;
        let nodes = self.parser.parse(&body)?;
        let output = remote::extract(&nodes)?;
        info!(
            "compiled {} sources remotely ({} errors, {} warnings)",
            req.sources().len(),
            output.errors.len(),
            output.warnings.len()
        );
        Ok(CompileResult::Success(compose_remote_artifact(req, &output, Utc::now())))
    }
}

/// Final remote artifact: the debug preamble (when enabled) then the code.
pub fn compose_remote_artifact(
    req: &BuildRequest,
    output: &RemoteOutput,
    generated: DateTime<Utc>,
) -> Vec<u8> {
    let mut artifact = String::new();
    if req.debug() {
        artifact.push_str(&diagnostics::debug_preamble(
            &output.statistics,
            &output.errors,
            &output.warnings,
            generated,
        ));
    }
    artifact.push_str(&output.code);
    artifact.into_bytes()
}
