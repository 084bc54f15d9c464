//! The document revalidation interceptor.
//!
//! An [`Interceptor`] reacts to the three lifecycle events a host delivers:
//!
//! - [`install`](Interceptor::install): precache the root path and the shell
//!   document into the current generation.
//! - [`fetch`](Interceptor::fetch): answer a request: navigations go through
//!   the ETag revalidation state machine in [`navigation`], everything else is
//!   served cache-first by [`subresource`].
//! - [`activate`](Interceptor::activate): delete every stale generation.
//!
//! The handlers share no state beyond the cache storage, so each can be
//! driven independently against any [`CacheStorage`] and [`Network`].

use std::sync::Arc;

use thiserror::Error;

use crate::cache::CacheStorage;
use crate::config::{ConfigError, ShellConfig};
use crate::http::{Request, Response};
use crate::network::{Network, NetworkError};

pub mod activate;
pub mod install;
pub mod navigation;
pub mod subresource;

pub use activate::{ActivateError, ActivateReport};
pub use install::{InstallError, Installed};
pub use navigation::{NavigationError, NavigationOutcome};
pub use subresource::SubresourceOutcome;

/// Errors surfaced to the requester by [`Interceptor::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// A navigation could be satisfied neither by the network nor by the cache.
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    /// A subresource missed the cache and the network rejected the request.
    #[error("subresource fetch failed: {0}")]
    Network(#[from] NetworkError),
}

/// One version of the interceptor, bound to a configuration, a cache storage
/// and a network.
#[derive(Debug)]
pub struct Interceptor<S, N> {
    config: ShellConfig,
    shell: Request,
    precache: Vec<Request>,
    storage: Arc<S>,
    network: Arc<N>,
}

impl<S, N> Interceptor<S, N>
where
    S: CacheStorage,
    N: Network,
{
    /// Creates an interceptor after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid.
    pub fn new(config: ShellConfig, storage: Arc<S>, network: Arc<N>) -> Result<Self, ConfigError> {
        config.validate()?;
        let shell = config.shell_request()?;
        let precache = config.precache_requests()?;
        Ok(Self {
            config,
            shell,
            precache,
            storage,
            network,
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Name of the generation this version reads and writes.
    pub fn generation(&self) -> &str {
        &self.config.generation
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Answers an intercepted request, routing by its mode.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Navigation`]: a navigation found neither network nor
    ///   cached shell.
    /// - [`FetchError::Network`]: a subresource missed the cache and the
    ///   network failed.
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if request.is_navigation() {
            Ok(self.navigate(request).await?.into_response())
        } else {
            Ok(self.subresource(request).await?.into_response())
        }
    }
}
