//! Subresources: cache-first, never written back.

use tracing::{debug, warn};

use super::{FetchError, Interceptor};
use crate::cache::CacheStorage;
use crate::http::{Request, Response};
use crate::network::Network;

/// Where a subresource response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubresourceOutcome {
    CacheHit(Response),
    Network(Response),
}

impl SubresourceOutcome {
    pub fn response(&self) -> &Response {
        match self {
            Self::CacheHit(response) | Self::Network(response) => response,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Self::CacheHit(response) | Self::Network(response) => response,
        }
    }
}

impl<S, N> Interceptor<S, N>
where
    S: CacheStorage,
    N: Network,
{
    /// Serves `request` from any generation if present, otherwise from the
    /// network. Network responses are returned without being cached; only
    /// install and navigation write entries.
    ///
    /// A failing cache lookup is logged and treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the lookup missed and the network
    /// rejected the request.
    pub async fn subresource(&self, request: &Request) -> Result<SubresourceOutcome, FetchError> {
        match self.storage.match_any(request).await {
            Ok(Some(response)) => {
                debug!(url = %request.url(), "subresource cache hit");
                return Ok(SubresourceOutcome::CacheHit(response));
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url(), error = %e, "cache lookup failed, using network"),
        }

        let response = self.network.fetch(request).await?;
        debug!(url = %request.url(), status = %response.status(), "subresource from network");
        Ok(SubresourceOutcome::Network(response))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{Cache, MemoryStorage};
    use crate::config::ShellConfig;
    use crate::http::StatusCode;
    use crate::network::{NetworkError, ScriptedNetwork};
    use url::Url;

    fn asset(path: &str) -> Request {
        Request::get(Url::parse("https://app.example").unwrap().join(path).unwrap())
    }

    fn setup() -> (
        Interceptor<MemoryStorage, ScriptedNetwork>,
        Arc<MemoryStorage>,
        Arc<ScriptedNetwork>,
    ) {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        let config = ShellConfig::new(Url::parse("https://app.example").unwrap())
            .with_generation("shell-v2");
        let interceptor =
            Interceptor::new(config, Arc::clone(&storage), Arc::clone(&network)).unwrap();
        (interceptor, storage, network)
    }

    #[tokio::test]
    async fn cache_hit_makes_no_network_call() {
        let (interceptor, storage, network) = setup();
        let cache = storage.open("shell-v2").await.unwrap();
        cache
            .put(&asset("/app.js"), Response::new(StatusCode::OK).body("js"))
            .await
            .unwrap();

        let outcome = interceptor.subresource(&asset("/app.js")).await.unwrap();
        assert!(matches!(outcome, SubresourceOutcome::CacheHit(_)));
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn hit_in_stale_generation_is_served() {
        let (interceptor, storage, network) = setup();
        let old = storage.open("shell-v1").await.unwrap();
        old.put(&asset("/logo.png"), Response::new(StatusCode::OK).body("png"))
            .await
            .unwrap();

        let outcome = interceptor.subresource(&asset("/logo.png")).await.unwrap();
        assert_eq!(outcome.response().body_bytes().as_ref(), b"png");
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn miss_is_fetched_but_not_stored() {
        let (interceptor, storage, network) = setup();
        network.serve("/style.css", "body{}", Some("\"c1\""));

        let outcome = interceptor.subresource(&asset("/style.css")).await.unwrap();
        assert!(matches!(outcome, SubresourceOutcome::Network(_)));
        assert!(storage.match_any(&asset("/style.css")).await.unwrap().is_none());

        interceptor.subresource(&asset("/style.css")).await.unwrap();
        assert_eq!(network.call_count(), 2);
    }

    #[tokio::test]
    async fn network_failure_propagates() {
        let (interceptor, _storage, network) = setup();
        network.go_offline();

        let err = interceptor.subresource(&asset("/app.js")).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Network(NetworkError::Unreachable { .. })
        ));
    }
}
