//! Timeout limits for compiler subprocesses and the remote exchange
//!
//! - `compile_seconds`: maximum wall-clock time per compiler subprocess
//! - `connect_seconds`: TCP connect timeout for the remote service
//! - `read_seconds`: maximum time a single socket read or write may block
//! - `request_seconds`: deadline for one whole remote exchange
//!
//! Nothing here retries. An expired limit is reported once and the build
//! falls back per the pipeline's failure rules.

use std::time::{Duration, Instant};

use closure_wire::ClientConfig;
use serde::{Deserialize, Serialize};

/// Largest remote response accepted
pub const MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-subprocess limit (default: 300 = 5 min)
    pub compile_seconds: u64,

    /// Connect timeout (default: 30)
    pub connect_seconds: u64,

    /// Per read/write limit on the socket (default: 60)
    pub read_seconds: u64,

    /// Whole remote exchange (default: 180)
    pub request_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            compile_seconds: 300,
            connect_seconds: 30,
            read_seconds: 60,
            request_seconds: 180,
        }
    }
}

impl TimeoutConfig {
    /// Validate bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.compile_seconds == 0 || self.compile_seconds > 3600 {
            return Err(TimeoutValidationError::CompileOutOfBounds {
                value: self.compile_seconds,
            });
        }

        if self.request_seconds == 0 || self.request_seconds > 3600 {
            return Err(TimeoutValidationError::RequestOutOfBounds {
                value: self.request_seconds,
            });
        }

        if self.connect_seconds == 0 || self.connect_seconds > 300 {
            return Err(TimeoutValidationError::ConnectOutOfBounds {
                value: self.connect_seconds,
            });
        }

        // A single read can never outlive the whole exchange
        if self.read_seconds == 0 || self.read_seconds > self.request_seconds {
            return Err(TimeoutValidationError::ReadOutOfBounds {
                value: self.read_seconds,
                max: self.request_seconds,
            });
        }

        Ok(())
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_seconds)
    }

    /// Socket limits for the raw HTTP client
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.connect_seconds),
            io_timeout: Duration::from_secs(self.read_seconds),
            overall_timeout: Duration::from_secs(self.request_seconds),
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("compile_seconds must be in (0, 3600], got {value}")]
    CompileOutOfBounds { value: u64 },

    #[error("request_seconds must be in (0, 3600], got {value}")]
    RequestOutOfBounds { value: u64 },

    #[error("connect_seconds must be in (0, 300], got {value}")]
    ConnectOutOfBounds { value: u64 },

    #[error("read_seconds must be in (0, {max}], got {value}")]
    ReadOutOfBounds { value: u64, max: u64 },
}

/// Wall-clock deadline for one blocking operation
///
/// The deadline only reports expiry; the caller decides how to abort.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start_time: Instant,
    limit: Duration,
}

impl Deadline {
    /// Start the clock now
    pub fn after(limit: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            limit,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time left before expiry
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}
