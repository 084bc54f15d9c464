//! Install: precache the application shell.

use futures::future::join_all;
use thiserror::Error;
use tracing::info;

use super::Interceptor;
use crate::cache::{Cache, CacheError, CacheStorage};
use crate::http::StatusCode;
use crate::network::{Network, NetworkError};

/// Why an install failed. Any of these keeps the new version from activating.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to precache {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("precache of {url} answered {status}")]
    BadStatus { url: String, status: StatusCode },

    #[error("cache storage failed during install: {0}")]
    Cache(#[from] CacheError),
}

/// A completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    /// The new version asks to take control without waiting for existing
    /// clients to go away. Mirrors [`ShellConfig::skip_waiting`].
    ///
    /// [`ShellConfig::skip_waiting`]: crate::config::ShellConfig::skip_waiting
    pub skip_waiting: bool,
    /// Number of entries written to the generation.
    pub precached: usize,
}

impl<S, N> Interceptor<S, N>
where
    S: CacheStorage,
    N: Network,
{
    /// Opens the current generation and stores the root path and the shell
    /// document, fetched from the network.
    ///
    /// All precache requests are issued concurrently and the entries are
    /// written only once every one of them has succeeded; a failed install
    /// leaves the generation untouched.
    ///
    /// # Errors
    ///
    /// - [`InstallError::Network`]: a precache request was rejected.
    /// - [`InstallError::BadStatus`]: a precache request answered non-2xx.
    /// - [`InstallError::Cache`]: the generation could not be opened or written.
    pub async fn install(&self) -> Result<Installed, InstallError> {
        let cache = self.storage.open(self.generation()).await?;

        let results = join_all(self.precache.iter().map(|req| self.network.fetch(req))).await;

        let mut entries = Vec::with_capacity(self.precache.len());
        for (request, result) in self.precache.iter().zip(results) {
            let url = request.url().to_string();
            let response = result.map_err(|source| InstallError::Network {
                url: url.clone(),
                source,
            })?;
            if !response.is_success() {
                return Err(InstallError::BadStatus {
                    url,
                    status: response.status(),
                });
            }
            entries.push((request.clone(), response));
        }

        let precached = entries.len();
        cache.put_all(entries).await?;

        info!(generation = self.generation(), precached, "install complete");
        Ok(Installed {
            skip_waiting: self.config.skip_waiting,
            precached,
        })
    }
}
