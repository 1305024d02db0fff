//! Closure Wire
//!
//! The transport pieces closure-cache needs to talk to a remote compile
//! service without a full HTTP stack: a one-shot HTTP/1.1 POST client, a
//! chunked transfer-encoding decoder and form encoding.

pub mod chunked;
pub mod client;
pub mod error;
pub mod form;

pub use client::{ClientConfig, HttpClient, RawResponse};
pub use error::{ChunkedError, WireError};
pub use form::FormParams;
