//! Remote compile service path

use std::fs;

use closure_wire::{FormParams, HttpClient};
use log::debug;
use serde::{Deserialize, Serialize};

use super::diagnostics::{CompilerMessage, Statistics};
use super::PipelineError;
use crate::request::BuildRequest;
use crate::response::ResponseNode;

/// Separator between inlined source contents
pub const JS_CODE_SEPARATOR: &str = "\n\n";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Remote service endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "closure-compiler.appspot.com".to_string(),
            port: 80,
            path: "/compile".to_string(),
        }
    }
}

impl RemoteConfig {
    /// `host:port` as passed to the client
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Submits form parameters to a compile service and returns the reply body
pub trait CompileTransport: Send + Sync {
    fn submit(&self, params: &FormParams, referer: Option<&str>) -> Result<Vec<u8>, PipelineError>;
}

/// `CompileTransport` over the raw HTTP client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: HttpClient,
    remote: RemoteConfig,
}

impl HttpTransport {
    pub fn new(client: HttpClient, remote: RemoteConfig) -> Self {
        Self { client, remote }
    }

    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }
}

impl CompileTransport for HttpTransport {
    fn submit(&self, params: &FormParams, referer: Option<&str>) -> Result<Vec<u8>, PipelineError> {
        let body = params.encode();
        let mut headers = Vec::with_capacity(2);
        if let Some(referer) = referer {
            headers.push(("Referer", referer));
        }
        headers.push(("Content-Type", FORM_CONTENT_TYPE));

        let authority = self.remote.authority();
        let response = self
            .client
            .post(&authority, &self.remote.path, &headers, body.as_bytes())?;

        if !response.is_success() {
            return Err(PipelineError::Protocol(format!(
                "{}{} answered {:?}",
                authority, self.remote.path, response.status_line
            )));
        }
        Ok(response.body)
    }
}

/// Ordered request parameters for `req`.
///
/// Sources are referenced as `code_url_N` when a code URL prefix is set,
/// otherwise their contents are inlined as one `js_code` value.
pub fn build_params(req: &BuildRequest) -> Result<FormParams, PipelineError> {
    let mut params = FormParams::new();

    match req.code_url_prefix() {
        Some(prefix) => {
            for (i, source) in req.sources().iter().enumerate() {
                params.push(
                    format!("code_url_{}", i),
                    format!("{}{}", prefix, req.source_url_path(source)),
                );
            }
        }
        None => {
            let mut contents = Vec::with_capacity(req.sources().len());
            for source in req.sources() {
                let text = fs::read_to_string(source).map_err(|e| PipelineError::SourceRead {
                    path: source.clone(),
                    source: e,
                })?;
                contents.push(text);
            }
            params.push("js_code", contents.join(JS_CODE_SEPARATOR));
        }
    }

    params.push("compilation_level", req.optimization_level().as_flag());
    params.push("output_format", "xml");
    params.push("warning_level", req.warning_level().as_flag());
    if req.pretty_print() {
        params.push("formatting", "pretty_print");
    }
    if req.use_library() {
        params.push("use_closure_library", "true");
    }
    params.push("output_info_1", "compiled_code");
    params.push("output_info_2", "statistics");
    params.push("output_info_3", "warnings");
    params.push("output_info_4", "errors");

    Ok(params)
}

/// Fields pulled out of the reply tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub code: String,
    pub statistics: Statistics,
    pub errors: Vec<CompilerMessage>,
    pub warnings: Vec<CompilerMessage>,
}

/// Extract compiled code, statistics, warnings and errors from the root's
/// children. Unknown tags are ignored.
pub fn extract(nodes: &[ResponseNode]) -> Result<RemoteOutput, PipelineError> {
    let mut output = RemoteOutput::default();

    for node in nodes {
        match node.tag.as_str() {
            "compiledCode" => output.code = node.text_value().unwrap_or_default().to_string(),
            "warnings" => output.warnings = messages(node),
            "errors" => output.errors = messages(node),
            "statistics" => {
                for stat in node.children() {
                    let value = stat.text_value().unwrap_or_default().to_string();
                    match stat.tag.as_str() {
                        "originalSize" => output.statistics.original_size = value,
                        "originalGzipSize" => output.statistics.original_gzip_size = value,
                        "compressedSize" => output.statistics.compressed_size = value,
                        "compressedGzipSize" => output.statistics.compressed_gzip_size = value,
                        "compileTime" => output.statistics.compile_time = value,
                        _ => {}
                    }
                }
            }
            "serverErrors" => {
                let reported: Vec<String> = node
                    .children()
                    .iter()
                    .map(|e| match e.attribute("code") {
                        Some(code) => format!("{} (code {})", e.text_value().unwrap_or_default(), code),
                        None => e.text_value().unwrap_or_default().to_string(),
                    })
                    .collect();
                return Err(PipelineError::Protocol(format!(
                    "compile service reported: {}",
                    reported.join("; ")
                )));
            }
            other => debug!("ignoring <{}> in compile reply", other),
        }
    }

    Ok(output)
}

fn messages(node: &ResponseNode) -> Vec<CompilerMessage> {
    node.children()
        .iter()
        .map(|m| CompilerMessage {
            kind: m.attribute("type").unwrap_or_default().to_string(),
            description: m.text_value().unwrap_or_default().to_string(),
            lineno: m.attribute("lineno").unwrap_or_default().to_string(),
            charno: m.attribute("charno").unwrap_or_default().to_string(),
            line: m.attribute("line").unwrap_or_default().to_string(),
        })
        .collect()
}
