//! Cache key computation
//!
//! fingerprint = SHA-256 hex of the source list followed by the option
//! values, in a fixed field order. File contents are not read; staleness is
//! decided separately from modification times.

use sha2::{Digest, Sha256};

use crate::request::BuildRequest;

/// Separates fields; cannot occur in a path or option value.
const FIELD_SEPARATOR: u8 = 0;

/// Separates the source list from the option fields.
const SECTION_SEPARATOR: u8 = 1;

/// Compute the cache key for a request.
///
/// Covers, in order: sources, optimization level, warning level,
/// use_library, pretty_print, local_compile, debug. Externs, the code URL
/// prefix and the output wrapper are not part of the key.
pub fn fingerprint(req: &BuildRequest) -> String {
    let mut hasher = Sha256::new();

    for source in req.sources() {
        hasher.update(source.as_os_str().as_encoded_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }
    hasher.update([SECTION_SEPARATOR]);

    let fields = [
        req.optimization_level().as_flag(),
        req.warning_level().as_flag(),
        flag(req.use_library()),
        flag(req.pretty_print()),
        flag(req.local_compile()),
        flag(req.debug()),
    ];
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }

    hex::encode(hasher.finalize())
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
