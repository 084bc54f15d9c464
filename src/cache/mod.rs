//! Cache storage: named generations of request → response entries.
//!
//! A [`CacheStorage`] holds any number of named generations; each generation
//! is a [`Cache`] mapping a [`RequestKey`] to a stored [`Response`]. The
//! interceptor only ever writes to the generation named by its config, but
//! subresource lookups search every generation (see
//! [`CacheStorage::match_any`]).
//!
//! ## Backends
//!
//! - [`MemoryStorage`]: in-process, for embedding and tests.
//! - [`FsStorage`]: durable, one directory per generation, entries in
//!   HTTP/1.1 wire format.
//!
//! Both backends enforce the same storage rules: only `GET` requests are
//! stored or matched, `206 Partial Content` responses are rejected, and every
//! stored response must be representable in HTTP/1.1 wire format (a
//! three-digit status, token header names, header values without control
//! characters). An entry accepted by one backend is readable from any.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::http::{Method, Request, Response, StatusCode};

pub mod fs;
pub mod memory;

pub use fs::{FsCache, FsStorage};
pub use memory::{MemoryCache, MemoryStorage};

/// Errors produced by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot store a {method} request; only GET requests are cacheable")]
    UnsupportedMethod { method: Method },

    #[error("cannot store a 206 Partial Content response")]
    PartialResponse,

    #[error("cannot store status {status}; stored statuses must have three digits")]
    InvalidStatus { status: StatusCode },

    #[error("cannot store header `{name}`: name must be a token and value free of control characters")]
    InvalidHeader { name: String },

    #[error("cache generation `{name}` has been deleted")]
    Deleted { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("generation manifest is unreadable: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("corrupt cache entry at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// The identity a request is stored and matched under.
///
/// Two requests share a key when their method and URL match, ignoring the
/// URL fragment. Headers never take part in the identity.
///
/// # Examples
///
/// ```
/// use shellcache::cache::RequestKey;
/// use shellcache::http::Request;
/// use url::Url;
///
/// let a = Request::get(Url::parse("https://app.example/index.html#top").unwrap());
/// let b = Request::get(Url::parse("https://app.example/index.html").unwrap());
/// assert_eq!(RequestKey::of(&a), RequestKey::of(&b));
/// assert_eq!(RequestKey::of(&a).as_str(), "GET https://app.example/index.html");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Derives the key for a request.
    pub fn of(request: &Request) -> Self {
        let mut url = request.url().clone();
        url.set_fragment(None);
        Self(format!("{} {}", request.method(), url))
    }

    /// Rebuilds a key from its string form, as persisted by a backend.
    pub(crate) fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named cache generation.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the generation's name.
    fn name(&self) -> &str;

    /// Looks up the stored response for `request`.
    ///
    /// Non-`GET` requests never match.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Stores `response` under `request`, replacing any previous entry.
    async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError>;

    /// Stores every entry, or none of them if any entry is rejected.
    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<(), CacheError>;
}

/// The set of all cache generations.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    type Cache: Cache;

    /// Opens the generation called `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Self::Cache, CacheError>;

    /// Returns every generation name, in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Deletes the generation called `name` with all of its entries.
    ///
    /// Returns `false` if no such generation existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Looks `request` up in every generation, in creation order, and returns
    /// the first hit. Never creates a generation.
    async fn match_any(&self, request: &Request) -> Result<Option<Response>, CacheError>;
}

/// Checks the storage rules shared by every backend.
pub(crate) fn ensure_storable(request: &Request, response: &Response) -> Result<(), CacheError> {
    if request.method() != &Method::Get {
        return Err(CacheError::UnsupportedMethod {
            method: request.method().clone(),
        });
    }
    if response.status() == StatusCode::PARTIAL_CONTENT {
        return Err(CacheError::PartialResponse);
    }
    if !(100..=999).contains(&response.status().as_u16()) {
        return Err(CacheError::InvalidStatus {
            status: response.status(),
        });
    }
    for (name, value) in response.headers().iter() {
        if !is_token(name) || !is_field_value(value) {
            return Err(CacheError::InvalidHeader {
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

/// RFC 9110 `token`: the characters allowed in a header name.
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Header values may hold visible characters, spaces and tabs, never CR, LF
/// or other controls.
fn is_field_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b == b'\t' || (b >= 0x20 && b != 0x7f))
}

/// Returns `true` if `request` may be answered from a cache at all.
pub(crate) fn is_matchable(request: &Request) -> bool {
    request.method() == &Method::Get
}
