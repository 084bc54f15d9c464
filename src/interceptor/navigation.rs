//! Navigation: keep the shell entry in sync with the origin via ETags.
//!
//! Every navigation runs the same state machine against the shell entry of
//! the current generation:
//!
//! ```text
//!   cached shell with ETag? ── no ──────────────────────────────┐
//!        │ yes                                                  │
//!   conditional fetch (If-None-Match)                           │
//!        ├─ 304 ─────────────> FreshCached (no cache write)     │
//!        ├─ 2xx ─────────────> Updated (overwrite shell entry)  │
//!        └─ other / rejected ─────────────────────────────────> │
//!                                                               v
//!                                                 unconditional fetch
//!        ┌──────────────────────────────────────────────────────┤
//!        ├─ 2xx with ETag ───> Fetched { stored: true }         │
//!        ├─ any other answer > Fetched { stored: false }        │
//!        └─ rejected ────────> OfflineFallback, or Unavailable when
//!                              no shell entry exists
//! ```
//!
//! A navigation to an unchanged document therefore settles on the 304 path
//! and never rewrites the cache, while a changed document costs exactly one
//! write per navigation that observes it.

use thiserror::Error;
use tracing::{debug, warn};

use super::Interceptor;
use crate::cache::{Cache, CacheError, CacheStorage};
use crate::http::{Request, Response, StatusCode};
use crate::network::{Network, NetworkError};

/// Why a navigation produced nothing usable.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// The network was unreachable and there is no cached shell to fall back to.
    #[error("network unreachable and no cached shell to fall back to: {source}")]
    Unavailable {
        #[source]
        source: NetworkError,
    },

    /// The current generation could not be opened or read.
    #[error("cache storage failed during navigation: {0}")]
    Cache(#[from] CacheError),
}

/// Which path a navigation took, with the response to hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The origin confirmed the cached shell is current (`304`).
    FreshCached(Response),

    /// The origin sent new content for a conditional request; `stored`
    /// reports whether the shell entry was overwritten.
    Updated { response: Response, stored: bool },

    /// Answer of an unconditional fetch, returned as-is. `stored` is `true`
    /// when the response was `2xx` with an ETag and became the shell entry.
    Fetched { response: Response, stored: bool },

    /// The network was unreachable; this is the last cached shell.
    OfflineFallback { response: Response, cause: NetworkError },
}

impl NavigationOutcome {
    pub fn response(&self) -> &Response {
        match self {
            Self::FreshCached(response)
            | Self::Updated { response, .. }
            | Self::Fetched { response, .. }
            | Self::OfflineFallback { response, .. } => response,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Self::FreshCached(response)
            | Self::Updated { response, .. }
            | Self::Fetched { response, .. }
            | Self::OfflineFallback { response, .. } => response,
        }
    }

    /// Returns `true` if this navigation wrote the shell entry.
    pub fn wrote_cache(&self) -> bool {
        match self {
            Self::Updated { stored, .. } | Self::Fetched { stored, .. } => *stored,
            Self::FreshCached(_) | Self::OfflineFallback { .. } => false,
        }
    }
}

impl<S, N> Interceptor<S, N>
where
    S: CacheStorage,
    N: Network,
{
    /// Answers a navigation request, revalidating the shell entry on the way.
    ///
    /// # Errors
    ///
    /// - [`NavigationError::Unavailable`]: the network is unreachable and
    ///   no shell entry exists.
    /// - [`NavigationError::Cache`]: the current generation could not be
    ///   opened or read.
    pub async fn navigate(&self, request: &Request) -> Result<NavigationOutcome, NavigationError> {
        let cache = self.storage.open(self.generation()).await?;
        let cached = cache.match_request(&self.shell).await?;

        if let Some(cached) = &cached {
            match cached.etag() {
                Some(etag) => {
                    if let Some(outcome) = self.revalidate(&cache, request, cached, etag).await {
                        return Ok(outcome);
                    }
                }
                None => debug!(url = %request.url(), "cached shell has no ETag, skipping revalidation"),
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                let stored = response.is_success()
                    && response.etag().is_some()
                    && self.store_shell(&cache, &response).await;
                debug!(
                    url = %request.url(),
                    status = %response.status(),
                    stored,
                    "navigation fetched"
                );
                Ok(NavigationOutcome::Fetched { response, stored })
            }
            Err(cause) => self.offline_fallback(&cache, cached, cause).await,
        }
    }

    /// Issues the conditional request. `None` means the answer was not
    /// actionable and the caller must fall back to an unconditional fetch.
    async fn revalidate(
        &self,
        cache: &S::Cache,
        request: &Request,
        cached: &Response,
        etag: &str,
    ) -> Option<NavigationOutcome> {
        let response = match self.network.fetch(&request.conditional(etag)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url(), error = %e, "conditional fetch failed, refetching");
                return None;
            }
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(url = %request.url(), etag, "shell not modified");
            return Some(NavigationOutcome::FreshCached(cached.clone()));
        }
        if response.is_success() {
            let stored = self.store_shell(cache, &response).await;
            debug!(
                url = %request.url(),
                old_etag = etag,
                new_etag = response.etag().unwrap_or(""),
                stored,
                "shell updated"
            );
            return Some(NavigationOutcome::Updated { response, stored });
        }

        debug!(
            url = %request.url(),
            status = %response.status(),
            "conditional fetch not actionable, refetching"
        );
        None
    }

    /// Overwrites the shell entry. A failed write is logged and reported as
    /// `false`; the response is still served.
    async fn store_shell(&self, cache: &S::Cache, response: &Response) -> bool {
        match cache.put(&self.shell, response.clone()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(generation = cache.name(), error = %e, "failed to store shell");
                false
            }
        }
    }

    async fn offline_fallback(
        &self,
        cache: &S::Cache,
        snapshot: Option<Response>,
        cause: NetworkError,
    ) -> Result<NavigationOutcome, NavigationError> {
        // Re-read: another navigation may have refreshed the entry meanwhile.
        let latest = match cache.match_request(&self.shell).await {
            Ok(latest) => latest.or(snapshot),
            Err(e) => {
                warn!(error = %e, "re-reading shell failed, using earlier copy");
                snapshot
            }
        };

        match latest {
            Some(response) => {
                warn!(error = %cause, "network unreachable, serving cached shell");
                Ok(NavigationOutcome::OfflineFallback { response, cause })
            }
            None => Err(NavigationError::Unavailable { source: cause }),
        }
    }
}
