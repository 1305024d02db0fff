//! Artifact server
//!
//! Top-level flow for one request. A request is **Stale** when caching is
//! disabled or the cache entry needs a recompile; the pipeline runs and the
//! result is persisted. Otherwise it is **Fresh** and the cached artifact is
//! served, or a 304 when the client's validators match.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use crate::cache::{CacheError, CacheMetadata, CacheStore};
use crate::config::ConfigError;
use crate::pipeline::{CompileResult, CompilerPipeline, Diagnostic, PipelineError};
use crate::request::BuildRequest;

/// Content type of every served artifact
pub const CONTENT_TYPE: &str = "text/javascript";

/// Format for `Last-Modified` (IMF-fixdate)
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Errors from serving a request
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("compilation failed: {0}")]
    CompileFailed(Diagnostic),

    #[error("failed to write output: {0}")]
    Output(io::Error),
}

impl ServeError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ServeError::Config(_) => 1,
            ServeError::Cache(CacheError::Unwritable { .. }) => 1,
            ServeError::Cache(_) => 40,
            ServeError::Pipeline(e) => e.exit_code(),
            ServeError::CompileFailed(_) => 50,
            ServeError::Output(_) => 40,
        }
    }
}

/// Validators and caller context supplied with a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalRequest {
    /// Script driving the build; a newer script invalidates the cache
    pub caller_script: Option<PathBuf>,
    /// Raw `If-Modified-Since` header value
    pub if_modified_since: Option<String>,
    /// Raw `If-None-Match` header value
    pub if_none_match: Option<String>,
}

impl ConditionalRequest {
    /// True when the client's copy of an artifact with `meta` is current.
    ///
    /// `If-Modified-Since` is only consulted without `If-None-Match`.
    pub fn is_not_modified(&self, meta: &CacheMetadata) -> bool {
        if let Some(ref header) = self.if_none_match {
            return etag_matches(header, &meta.etag);
        }

        if let Some(ref header) = self.if_modified_since {
            if let Some(since) = parse_http_date(header) {
                return unix_seconds(meta.modified) <= since;
            }
        }

        false
    }
}

/// Result of serving one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    /// Freshly compiled
    Compiled { body: Vec<u8> },
    /// Served from cache
    Cached {
        body: Vec<u8>,
        last_modified: SystemTime,
        etag: String,
    },
    /// Client copy is current
    NotModified { last_modified: SystemTime, etag: String },
}

impl ServeOutcome {
    pub fn status(&self) -> u16 {
        match self {
            ServeOutcome::NotModified { .. } => 304,
            _ => 200,
        }
    }

    pub fn body(&self) -> Option<&[u8]> {
        match self {
            ServeOutcome::Compiled { body } | ServeOutcome::Cached { body, .. } => Some(body.as_slice()),
            ServeOutcome::NotModified { .. } => None,
        }
    }

    /// Headers the caller must emit, in order
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Type", CONTENT_TYPE.to_string())];
        match self {
            ServeOutcome::Compiled { .. } => {}
            ServeOutcome::Cached {
                last_modified,
                etag,
                ..
            }
            | ServeOutcome::NotModified {
                last_modified,
                etag,
            } => {
                headers.push(("Last-Modified", format_http_date(*last_modified)));
                headers.push(("ETag", format!("\"{}\"", etag)));
            }
        }
        headers
    }

    /// Write a CGI response: optional `Status` line, headers, blank line, body.
    pub fn write_cgi<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.status() == 304 {
            out.write_all(b"Status: 304 Not Modified\r\n")?;
        }
        for (name, value) in self.headers() {
            write!(out, "{}: {}\r\n", name, value)?;
        }
        out.write_all(b"\r\n")?;
        if let Some(body) = self.body() {
            out.write_all(body)?;
        }
        out.flush()
    }
}

/// Cache state of a request, for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub fingerprint: String,
    pub cache_file: PathBuf,
    pub cached: bool,
    pub needs_recompile: bool,
}

/// Serves cached or freshly compiled artifacts
pub struct ArtifactServer {
    pipeline: CompilerPipeline,
}

impl ArtifactServer {
    pub fn new(pipeline: CompilerPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &CompilerPipeline {
        &self.pipeline
    }

    /// Serve `req`, compiling when the cache is missing, stale or disabled.
    pub fn write(&self, req: &BuildRequest, cond: &ConditionalRequest) -> Result<ServeOutcome, ServeError> {
        let Some(dir) = req.cache_directory() else {
            debug!("caching disabled; compiling");
            let body = self.compile(req)?;
            return Ok(ServeOutcome::Compiled { body });
        };

        let store = CacheStore::open(dir)?;
        let entry = store.entry_for(req);

        if store.needs_recompile(&entry, req, cond.caller_script.as_deref()) {
            let body = self.compile(req)?;
            store.write(&entry, &body)?;
            info!("cached {} as {}", entry.fingerprint(), entry.path().display());
            return Ok(ServeOutcome::Compiled { body });
        }

        let (body, meta) = store.read_with_metadata(&entry)?;
        if cond.is_not_modified(&meta) {
            debug!("{} not modified", entry.fingerprint());
            return Ok(ServeOutcome::NotModified {
                last_modified: meta.modified,
                etag: meta.etag,
            });
        }

        debug!("serving {} from cache", entry.fingerprint());
        Ok(ServeOutcome::Cached {
            body,
            last_modified: meta.modified,
            etag: meta.etag,
        })
    }

    /// Fingerprint and staleness of `req` without compiling
    pub fn status(&self, req: &BuildRequest, caller_script: Option<&Path>) -> Result<Option<CacheStatus>, ServeError> {
        let Some(dir) = req.cache_directory() else {
            return Ok(None);
        };
        let store = CacheStore::open(dir)?;
        let entry = store.entry_for(req);
        Ok(Some(CacheStatus {
            fingerprint: entry.fingerprint().to_string(),
            cache_file: entry.path().to_path_buf(),
            cached: entry.exists(),
            needs_recompile: store.needs_recompile(&entry, req, caller_script),
        }))
    }

    fn compile(&self, req: &BuildRequest) -> Result<Vec<u8>, ServeError> {
        match self.pipeline.compile(req)? {
            CompileResult::Success(body) => Ok(body),
            CompileResult::Failure(diag) => Err(ServeError::CompileFailed(diag)),
        }
    }
}

/// Match an `If-None-Match` value against an ETag.
///
/// Accepts `*`, comma-separated lists, and quoted, weak or bare tags.
pub fn etag_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        let candidate = candidate
            .strip_prefix('"')
            .and_then(|c| c.strip_suffix('"'))
            .unwrap_or(candidate);
        !candidate.is_empty() && candidate == etag
    })
}

/// Parse an HTTP date into Unix seconds
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

/// Format a timestamp as IMF-fixdate
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn meta(secs: u64, etag: &str) -> CacheMetadata {
        CacheMetadata {
            modified: UNIX_EPOCH + Duration::from_secs(secs),
            etag: etag.to_string(),
        }
    }

    #[test]
    fn test_etag_matching_forms() {
        assert!(etag_matches("abc", "abc"));
        assert!(etag_matches("\"abc\"", "abc"));
        assert!(etag_matches("W/\"abc\"", "abc"));
        assert!(etag_matches(" \"x\", \"abc\" ", "abc"));
        assert!(etag_matches("*", "abc"));
        assert!(!etag_matches("\"abd\"", "abc"));
        assert!(!etag_matches("", "abc"));
    }

    #[test]
    fn test_http_date_round_trip() {
        // 1994-11-06 08:49:37 UTC
        let time = UNIX_EPOCH + Duration::from_secs(784111777);
        let formatted = format_http_date(time);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(784111777));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_not_modified_by_etag() {
        let cond = ConditionalRequest {
            if_none_match: Some("\"h1\"".into()),
            ..ConditionalRequest::default()
        };
        assert!(cond.is_not_modified(&meta(100, "h1")));
        assert!(!cond.is_not_modified(&meta(100, "h2")));
    }

    #[test]
    fn test_not_modified_by_date() {
        let at = |secs| ConditionalRequest {
            if_modified_since: Some(format_http_date(UNIX_EPOCH + Duration::from_secs(secs))),
            ..ConditionalRequest::default()
        };
        assert!(at(784111777).is_not_modified(&meta(784111777, "h")));
        assert!(at(784111800).is_not_modified(&meta(784111777, "h")));
        assert!(!at(784111776).is_not_modified(&meta(784111777, "h")));
    }

    #[test]
    fn test_etag_mismatch_ignores_modified_since() {
        let cond = ConditionalRequest {
            if_none_match: Some("\"old\"".into()),
            if_modified_since: Some(format_http_date(UNIX_EPOCH + Duration::from_secs(100))),
            ..ConditionalRequest::default()
        };
        assert!(!cond.is_not_modified(&meta(100, "new")));
        assert!(cond.is_not_modified(&meta(100, "old")));
    }

    #[test]
    fn test_no_validators_is_modified() {
        assert!(!ConditionalRequest::default().is_not_modified(&meta(1, "h")));
        let garbage = ConditionalRequest {
            if_modified_since: Some("not a date".into()),
            ..ConditionalRequest::default()
        };
        assert!(!garbage.is_not_modified(&meta(1, "h")));
    }

    #[test]
    fn test_outcome_headers() {
        let compiled = ServeOutcome::Compiled { body: b"x".to_vec() };
        assert_eq!(compiled.headers(), vec![("Content-Type", "text/javascript".to_string())]);
        assert_eq!(compiled.status(), 200);

        let not_modified = ServeOutcome::NotModified {
            last_modified: UNIX_EPOCH + Duration::from_secs(784111777),
            etag: "h1".into(),
        };
        assert_eq!(not_modified.status(), 304);
        assert!(not_modified.body().is_none());
        assert_eq!(
            not_modified.headers(),
            vec![
                ("Content-Type", "text/javascript".to_string()),
                ("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT".to_string()),
                ("ETag", "\"h1\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_write_cgi() {
        let mut out = Vec::new();
        ServeOutcome::Compiled { body: b"1;2;".to_vec() }
            .write_cgi(&mut out)
            .unwrap();
        assert_eq!(out, b"Content-Type: text/javascript\r\n\r\n1;2;");

        let mut out = Vec::new();
        ServeOutcome::NotModified {
            last_modified: UNIX_EPOCH + Duration::from_secs(784111777),
            etag: "h1".into(),
        }
        .write_cgi(&mut out)
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Status: 304 Not Modified\r\n"));
        assert!(text.ends_with("ETag: \"h1\"\r\n\r\n"));
    }

    #[test]
    fn test_exit_codes() {
        let failed = ServeError::CompileFailed(Diagnostic::with_reason(
            crate::pipeline::Stage::Script,
            "java",
            "timed out",
        ));
        assert_eq!(failed.exit_code(), 50);

        let network = ServeError::Pipeline(PipelineError::Network(closure_wire::WireError::Timeout("connecting")));
        assert_eq!(network.exit_code(), 20);

        let protocol = ServeError::Pipeline(PipelineError::Protocol("bad".into()));
        assert_eq!(protocol.exit_code(), 30);

        let output = ServeError::Output(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"));
        assert_eq!(output.exit_code(), 40);
        assert!(output.to_string().starts_with("failed to write output"));
    }
}
