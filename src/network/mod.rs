//! The network seam: how the interceptor reaches the origin.
//!
//! Transport is supplied by the host: anything that can turn a [`Request`]
//! into a [`Response`] implements [`Network`]. A failed transport (offline,
//! DNS failure, refused connection) surfaces as a [`NetworkError`]; an HTTP
//! error status is *not* a network error and arrives as a normal response.
//!
//! [`ScriptedNetwork`] is an in-process origin for tests and demos.

use async_trait::async_trait;
use thiserror::Error;

use crate::http::{Request, Response};

pub mod scripted;

pub use scripted::ScriptedNetwork;

/// A rejected network operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network unreachable while fetching {url}")]
    Unreachable { url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} was rejected: {reason}")]
    Rejected { url: String, reason: String },
}

/// Issues requests to the origin.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}
