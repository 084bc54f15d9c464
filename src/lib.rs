//! # shellcache
//!
//! An offline-first HTTP cache for a single-page application shell.
//!
//! The shell document is revalidated with `If-None-Match` on every
//! navigation, static assets are served cache-first, and stale cache
//! generations are swept when a new version activates.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use shellcache::cache::MemoryStorage;
//! use shellcache::config::ShellConfig;
//! use shellcache::http::Request;
//! use shellcache::interceptor::{Interceptor, NavigationOutcome};
//! use shellcache::network::ScriptedNetwork;
//! use url::Url;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let origin = Url::parse("https://app.example")?;
//! let network = Arc::new(ScriptedNetwork::new());
//! network.serve("/", "<!doctype html>", Some("\"v1\""));
//! network.serve("/index.html", "<!doctype html>", Some("\"v1\""));
//!
//! let interceptor = Interceptor::new(
//!     ShellConfig::new(origin.clone()),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::clone(&network),
//! )?;
//! interceptor.install().await?;
//! interceptor.activate().await?;
//!
//! let outcome = interceptor.navigate(&Request::navigate(origin)).await?;
//! assert!(matches!(outcome, NavigationOutcome::FreshCached(_)));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod interceptor;
pub mod network;
pub mod registration;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{Cache, CacheError, CacheStorage, FsStorage, MemoryStorage};
pub use config::ShellConfig;
pub use http::{Headers, Method, Request, RequestMode, Response, StatusCode};
pub use interceptor::{FetchError, Interceptor, NavigationError, NavigationOutcome};
pub use network::{Network, NetworkError};
pub use registration::{RegisterOutcome, Registration, RegistrationError};
