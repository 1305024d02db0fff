//! Error types for the wire layer.

use std::io;

/// Errors produced while decoding a chunked transfer-encoded body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkedError {
    #[error("chunk size line at offset {offset} is not terminated by CRLF")]
    UnterminatedSizeLine { offset: usize },

    #[error("invalid chunk size {line:?} at offset {offset}")]
    InvalidSize { line: String, offset: usize },

    #[error("chunk at offset {offset} declares {declared} bytes but only {available} remain")]
    Truncated {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("chunk data ending at offset {offset} is not followed by CRLF")]
    MissingTerminator { offset: usize },
}

/// Errors produced by the raw HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("response exceeds {max_bytes} bytes")]
    ResponseTooLarge { max_bytes: usize },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid chunked body: {0}")]
    Chunked(#[from] ChunkedError),
}

impl WireError {
    /// Returns true when the peer answered but the answer was unusable.
    ///
    /// Everything else is a connection-level failure.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            WireError::ResponseTooLarge { .. } | WireError::Malformed(_) | WireError::Chunked(_)
        )
    }
}
