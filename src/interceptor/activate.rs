//! Activate: sweep stale generations.

use futures::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use super::Interceptor;
use crate::cache::{CacheError, CacheStorage};
use crate::network::Network;

#[derive(Debug, Error)]
pub enum ActivateError {
    #[error("failed to enumerate cache generations: {0}")]
    Enumerate(#[source] CacheError),
}

/// What an activation sweep did.
#[derive(Debug)]
pub struct ActivateReport {
    /// The generation that was kept.
    pub kept: String,
    pub deleted: Vec<String>,
    /// Generations whose deletion failed, with the reason.
    pub failed: Vec<(String, CacheError)>,
}

impl ActivateReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<S, N> Interceptor<S, N>
where
    S: CacheStorage,
    N: Network,
{
    /// Deletes every generation except the current one.
    ///
    /// Deletions run concurrently and independently: one failing deletion is
    /// recorded in [`ActivateReport::failed`] and does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns [`ActivateError::Enumerate`] if the generation names cannot be
    /// listed; nothing is deleted in that case.
    pub async fn activate(&self) -> Result<ActivateReport, ActivateError> {
        let current = self.generation();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await
            .map_err(ActivateError::Enumerate)?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;

        let mut report = ActivateReport {
            kept: current.to_owned(),
            deleted: Vec::new(),
            failed: Vec::new(),
        };
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => report.deleted.push(name),
                Err(e) => {
                    warn!(generation = %name, error = %e, "failed to delete stale generation");
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            generation = current,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "activation sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::{MemoryCache, MemoryStorage};
    use crate::config::ShellConfig;
    use crate::http::{Request, Response};
    use crate::network::ScriptedNetwork;
    use url::Url;

    fn config(generation: &str) -> ShellConfig {
        ShellConfig::new(Url::parse("https://app.example").unwrap()).with_generation(generation)
    }

    #[tokio::test]
    async fn keeps_only_current_generation() {
        let storage = Arc::new(MemoryStorage::new());
        for name in ["shell-v1", "shell-v2", "shell-v3", "unrelated"] {
            storage.open(name).await.unwrap();
        }
        let interceptor = Interceptor::new(
            config("shell-v3"),
            Arc::clone(&storage),
            Arc::new(ScriptedNetwork::new()),
        )
        .unwrap();

        let report = interceptor.activate().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.deleted, vec!["shell-v1", "shell-v2", "unrelated"]);
        assert_eq!(storage.keys().await.unwrap(), vec!["shell-v3"]);
    }

    #[tokio::test]
    async fn sweep_with_nothing_stale_is_a_no_op() {
        let storage = Arc::new(MemoryStorage::new());
        let interceptor = Interceptor::new(
            config("shell-v1"),
            Arc::clone(&storage),
            Arc::new(ScriptedNetwork::new()),
        )
        .unwrap();

        let report = interceptor.activate().await.unwrap();
        assert!(report.deleted.is_empty());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    /// Storage whose deletion of one named generation always fails.
    struct Stubborn {
        inner: MemoryStorage,
        pinned: &'static str,
    }

    #[async_trait]
    impl CacheStorage for Stubborn {
        type Cache = MemoryCache;

        async fn open(&self, name: &str) -> Result<MemoryCache, CacheError> {
            self.inner.open(name).await
        }

        async fn keys(&self) -> Result<Vec<String>, CacheError> {
            self.inner.keys().await
        }

        async fn delete(&self, name: &str) -> Result<bool, CacheError> {
            if name == self.pinned {
                return Err(CacheError::Io(std::io::Error::other("device busy")));
            }
            self.inner.delete(name).await
        }

        async fn match_any(&self, request: &Request) -> Result<Option<Response>, CacheError> {
            self.inner.match_any(request).await
        }
    }

    #[tokio::test]
    async fn one_failed_deletion_does_not_block_others() {
        let storage = Arc::new(Stubborn {
            inner: MemoryStorage::new(),
            pinned: "shell-v1",
        });
        for name in ["shell-v1", "shell-v2", "shell-v3"] {
            storage.open(name).await.unwrap();
        }
        let interceptor = Interceptor::new(
            config("shell-v3"),
            Arc::clone(&storage),
            Arc::new(ScriptedNetwork::new()),
        )
        .unwrap();

        let report = interceptor.activate().await.unwrap();
        assert_eq!(report.deleted, vec!["shell-v2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "shell-v1");
        assert_eq!(storage.keys().await.unwrap(), vec!["shell-v1", "shell-v3"]);
    }
}
