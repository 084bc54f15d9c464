//! Host lifecycle: which interceptor version is installed, waiting, or in control.
//!
//! A [`Registration`] plays the part of the host platform. Each call to
//! [`register`](Registration::register) brings up a new interceptor version:
//!
//! 1. The version is installed. A failed install discards it and the
//!    previously active version, if any, stays in control.
//! 2. If the install asked to skip waiting, or nothing is active yet, the
//!    version takes control at once and its activate handler sweeps stale
//!    generations. Otherwise it waits until
//!    [`promote_waiting`](Registration::promote_waiting).
//!
//! Install and activate of successive versions never overlap. Fetches keep
//! flowing to the active version while a new one installs.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::config::{ConfigError, ShellConfig};
use crate::http::{Request, Response};
use crate::interceptor::{ActivateError, ActivateReport, FetchError, InstallError, Interceptor};
use crate::network::Network;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("install failed: {0}")]
    Install(#[from] InstallError),

    /// The version took control but its sweep could not run.
    #[error("activate failed: {0}")]
    Activate(#[from] ActivateError),

    #[error("no version is waiting to activate")]
    NothingWaiting,
}

/// Result of a successful [`Registration::register`].
#[derive(Debug)]
pub enum RegisterOutcome {
    /// The new version is now in control.
    Activated(ActivateReport),
    /// The new version is installed and waits for [`Registration::promote_waiting`].
    Waiting,
}

/// The host-side registry of interceptor versions for one scope.
pub struct Registration<S, N> {
    storage: Arc<S>,
    network: Arc<N>,
    active: RwLock<Option<Arc<Interceptor<S, N>>>>,
    waiting: Mutex<Option<Arc<Interceptor<S, N>>>>,
    // Serializes install/activate across versions.
    lifecycle: Mutex<()>,
}

impl<S, N> Registration<S, N>
where
    S: CacheStorage,
    N: Network,
{
    pub fn new(storage: Arc<S>, network: Arc<N>) -> Self {
        Self {
            storage,
            network,
            active: RwLock::new(None),
            waiting: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Installs a new version built from `config` and activates it if it may
    /// take control.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::Config`] / [`RegistrationError::Install`]: the
    ///   version was discarded; the active version is unchanged.
    /// - [`RegistrationError::Activate`]: the version is in control but its
    ///   stale-generation sweep failed.
    pub async fn register(&self, config: ShellConfig) -> Result<RegisterOutcome, RegistrationError> {
        let _lifecycle = self.lifecycle.lock().await;

        let interceptor = Arc::new(Interceptor::new(
            config,
            Arc::clone(&self.storage),
            Arc::clone(&self.network),
        )?);

        let installed = match interceptor.install().await {
            Ok(installed) => installed,
            Err(e) => {
                warn!(generation = interceptor.generation(), error = %e, "install failed, keeping current version");
                return Err(e.into());
            }
        };

        let has_active = self.active.read().await.is_some();
        if installed.skip_waiting || !has_active {
            let report = self.take_control(interceptor).await?;
            Ok(RegisterOutcome::Activated(report))
        } else {
            info!(generation = interceptor.generation(), "installed, waiting for clients to close");
            *self.waiting.lock().await = Some(interceptor);
            Ok(RegisterOutcome::Waiting)
        }
    }

    /// Activates the waiting version.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NothingWaiting`] if no version is waiting.
    pub async fn promote_waiting(&self) -> Result<ActivateReport, RegistrationError> {
        let _lifecycle = self.lifecycle.lock().await;
        let waiting = self
            .waiting
            .lock()
            .await
            .take()
            .ok_or(RegistrationError::NothingWaiting)?;
        self.take_control(waiting).await
    }

    /// Answers a request through the active version, or straight from the
    /// network when no version is in control.
    ///
    /// # Errors
    ///
    /// See [`Interceptor::fetch`].
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let active = self.active.read().await.clone();
        match active {
            Some(interceptor) => interceptor.fetch(request).await,
            None => Ok(self.network.fetch(request).await?),
        }
    }

    /// The version currently in control.
    pub async fn active(&self) -> Option<Arc<Interceptor<S, N>>> {
        self.active.read().await.clone()
    }

    pub async fn active_generation(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|i| i.generation().to_owned())
    }

    pub async fn waiting_generation(&self) -> Option<String> {
        self.waiting
            .lock()
            .await
            .as_ref()
            .map(|i| i.generation().to_owned())
    }

    async fn take_control(
        &self,
        interceptor: Arc<Interceptor<S, N>>,
    ) -> Result<ActivateReport, RegistrationError> {
        let previous = self
            .active
            .write()
            .await
            .replace(Arc::clone(&interceptor))
            .map(|i| i.generation().to_owned());
        // A superseded waiting version never gets to activate.
        self.waiting.lock().await.take();

        info!(
            generation = interceptor.generation(),
            previous = previous.as_deref().unwrap_or("none"),
            "version took control"
        );
        Ok(interceptor.activate().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::network::ScriptedNetwork;
    use url::Url;

    fn config(generation: &str) -> ShellConfig {
        ShellConfig::new(Url::parse("https://app.example").unwrap()).with_generation(generation)
    }

    fn registration() -> (
        Registration<MemoryStorage, ScriptedNetwork>,
        Arc<MemoryStorage>,
        Arc<ScriptedNetwork>,
    ) {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve("/", "<shell>", Some("\"v1\""));
        network.serve("/index.html", "<shell>", Some("\"v1\""));
        (
            Registration::new(Arc::clone(&storage), Arc::clone(&network)),
            storage,
            network,
        )
    }

    #[tokio::test]
    async fn first_version_activates_immediately() {
        let (reg, storage, _network) = registration();
        let outcome = reg.register(config("shell-v1")).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Activated(_)));
        assert_eq!(reg.active_generation().await.as_deref(), Some("shell-v1"));
        assert_eq!(storage.open("shell-v1").await.unwrap().len().await, 2);
    }

    #[tokio::test]
    async fn new_version_replaces_and_sweeps_old() {
        let (reg, storage, _network) = registration();
        reg.register(config("shell-v1")).await.unwrap();

        let outcome = reg.register(config("shell-v2")).await.unwrap();
        match outcome {
            RegisterOutcome::Activated(report) => assert_eq!(report.deleted, vec!["shell-v1"]),
            RegisterOutcome::Waiting => panic!("skip-waiting version should activate"),
        }
        assert_eq!(reg.active_generation().await.as_deref(), Some("shell-v2"));
        assert_eq!(storage.keys().await.unwrap(), vec!["shell-v2"]);
    }

    #[tokio::test]
    async fn failed_install_keeps_previous_version() {
        let (reg, storage, network) = registration();
        reg.register(config("shell-v1")).await.unwrap();

        network.go_offline();
        let err = reg.register(config("shell-v2")).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Install(_)));
        assert_eq!(reg.active_generation().await.as_deref(), Some("shell-v1"));
        assert!(storage.keys().await.unwrap().contains(&"shell-v1".to_owned()));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_install() {
        let (reg, _storage, network) = registration();
        let err = reg.register(config("")).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Config(ConfigError::EmptyGeneration)));
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn uncontrolled_fetch_goes_to_network() {
        let (reg, storage, network) = registration();
        let request = Request::navigate(Url::parse("https://app.example/").unwrap());

        let response = reg.fetch(&request).await.unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"<shell>");
        assert_eq!(network.call_count(), 1);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn version_without_skip_waiting_waits_for_promotion() {
        let (reg, storage, _network) = registration();
        reg.register(config("shell-v1")).await.unwrap();

        let outcome = reg
            .register(config("shell-v2").with_skip_waiting(false))
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::Waiting));
        assert_eq!(reg.active_generation().await.as_deref(), Some("shell-v1"));
        assert_eq!(reg.waiting_generation().await.as_deref(), Some("shell-v2"));
        assert_eq!(storage.keys().await.unwrap(), vec!["shell-v1", "shell-v2"]);

        let report = reg.promote_waiting().await.unwrap();
        assert_eq!(report.deleted, vec!["shell-v1"]);
        assert_eq!(reg.active_generation().await.as_deref(), Some("shell-v2"));
        assert_eq!(reg.waiting_generation().await, None);
    }

    #[tokio::test]
    async fn first_version_activates_even_without_skip_waiting() {
        let (reg, _storage, _network) = registration();
        let outcome = reg
            .register(config("shell-v1").with_skip_waiting(false))
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::Activated(_)));
    }

    #[tokio::test]
    async fn promote_without_waiting_version_fails() {
        let (reg, _storage, _network) = registration();
        assert!(matches!(
            reg.promote_waiting().await,
            Err(RegistrationError::NothingWaiting)
        ));
    }

    #[tokio::test]
    async fn controlled_navigation_uses_active_generation() {
        let (reg, storage, network) = registration();
        reg.register(config("shell-v1")).await.unwrap();
        network.clear_calls();

        let request = Request::navigate(Url::parse("https://app.example/").unwrap());
        reg.fetch(&request).await.unwrap();

        let cache = storage.open("shell-v1").await.unwrap();
        assert_eq!(cache.writes(), 2);
        assert_eq!(
            network.calls()[0].headers().get("if-none-match"),
            Some("\"v1\"")
        );
    }
}
