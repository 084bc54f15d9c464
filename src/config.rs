//! Interceptor configuration.
//!
//! The current generation name and the two shell paths are the only values
//! that change between deployments. They are passed into the interceptor
//! explicitly rather than read from globals, so every handler can be driven
//! with any configuration in isolation.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::http::Request;

pub const DEFAULT_GENERATION: &str = "fuente-cache";
pub const DEFAULT_ROOT_PATH: &str = "/";
pub const DEFAULT_SHELL_PATH: &str = "/index.html";

/// Errors produced while validating a [`ShellConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("generation name must not be empty")]
    EmptyGeneration,

    #[error("{field} must be an absolute path starting with '/', got {value:?}")]
    RelativePath { field: &'static str, value: String },

    #[error("scope origin {0} cannot serve as a base URL")]
    OpaqueOrigin(Url),

    #[error("cannot resolve {path:?} against {origin}: {source}")]
    Resolve {
        origin: Url,
        path: String,
        #[source]
        source: url::ParseError,
    },
}

/// What the interceptor caches and under which generation name.
///
/// Deserializes from any serde format; missing path fields fall back to the
/// defaults.
///
/// # Examples
///
/// ```
/// use shellcache::config::ShellConfig;
/// use url::Url;
///
/// let config = ShellConfig::new(Url::parse("https://app.example").unwrap())
///     .with_generation("shell-v2");
///
/// assert_eq!(config.generation, "shell-v2");
/// assert_eq!(config.shell_url().unwrap().as_str(), "https://app.example/index.html");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShellConfig {
    /// Name of the current cache generation. Every other generation is stale.
    #[serde(default = "default_generation")]
    pub generation: String,

    /// Origin the shell paths resolve against.
    pub origin: Url,

    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Path of the shell document whose entry is revalidated on navigation.
    #[serde(default = "default_shell_path")]
    pub shell_path: String,

    /// Whether a freshly installed version takes control at once instead of
    /// waiting for clients of the previous version to go away.
    #[serde(default = "default_skip_waiting")]
    pub skip_waiting: bool,
}

fn default_generation() -> String {
    DEFAULT_GENERATION.to_owned()
}

fn default_root_path() -> String {
    DEFAULT_ROOT_PATH.to_owned()
}

fn default_shell_path() -> String {
    DEFAULT_SHELL_PATH.to_owned()
}

fn default_skip_waiting() -> bool {
    true
}

impl ShellConfig {
    /// Creates a configuration with the default generation name and paths.
    pub fn new(origin: Url) -> Self {
        Self {
            generation: default_generation(),
            origin,
            root_path: default_root_path(),
            shell_path: default_shell_path(),
            skip_waiting: default_skip_waiting(),
        }
    }

    #[must_use]
    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.generation = generation.into();
        self
    }

    #[must_use]
    pub fn with_shell_path(mut self, path: impl Into<String>) -> Self {
        self.shell_path = path.into();
        self
    }

    #[must_use]
    pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
        self.skip_waiting = skip_waiting;
        self
    }

    #[must_use]
    pub fn with_root_path(mut self, path: impl Into<String>) -> Self {
        self.root_path = path.into();
        self
    }

    /// Checks the configuration and resolves both shell URLs.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyGeneration`] if the generation name is blank.
    /// - [`ConfigError::RelativePath`] if a path does not start with `/`.
    /// - [`ConfigError::OpaqueOrigin`] if the origin cannot have paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.trim().is_empty() {
            return Err(ConfigError::EmptyGeneration);
        }
        if self.origin.cannot_be_a_base() {
            return Err(ConfigError::OpaqueOrigin(self.origin.clone()));
        }
        for (field, value) in [("root_path", &self.root_path), ("shell_path", &self.shell_path)] {
            if !value.starts_with('/') {
                return Err(ConfigError::RelativePath {
                    field,
                    value: value.clone(),
                });
            }
        }
        self.root_url()?;
        self.shell_url()?;
        Ok(())
    }

    pub fn root_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.root_path)
    }

    pub fn shell_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.shell_path)
    }

    /// The request the shell entry is stored under.
    pub fn shell_request(&self) -> Result<Request, ConfigError> {
        Ok(Request::get(self.shell_url()?))
    }

    /// The requests fetched and stored on install, root first.
    pub fn precache_requests(&self) -> Result<Vec<Request>, ConfigError> {
        Ok(vec![
            Request::get(self.root_url()?),
            Request::get(self.shell_url()?),
        ])
    }

    fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin.join(path).map_err(|source| ConfigError::Resolve {
            origin: self.origin.clone(),
            path: path.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    #[test]
    fn defaults() {
        let config = ShellConfig::new(origin());
        assert_eq!(config.generation, "fuente-cache");
        assert_eq!(config.root_path, "/");
        assert_eq!(config.shell_path, "/index.html");
        assert!(config.skip_waiting);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn precache_is_root_then_shell() {
        let urls: Vec<_> = ShellConfig::new(origin())
            .precache_requests()
            .unwrap()
            .into_iter()
            .map(|r| r.url().to_string())
            .collect();
        assert_eq!(
            urls,
            vec!["https://app.example/", "https://app.example/index.html"]
        );
    }

    #[test]
    fn rejects_blank_generation() {
        let config = ShellConfig::new(origin()).with_generation("  ");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyGeneration)));
    }

    #[test]
    fn rejects_relative_shell_path() {
        let config = ShellConfig::new(origin()).with_shell_path("index.html");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RelativePath { field: "shell_path", .. })
        ));
    }

    #[test]
    fn rejects_opaque_origin() {
        let config = ShellConfig::new(Url::parse("data:text/plain,hi").unwrap());
        assert!(matches!(config.validate(), Err(ConfigError::OpaqueOrigin(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ShellConfig =
            serde_json::from_str(r#"{"origin": "https://app.example", "generation": "v7"}"#)
                .unwrap();
        assert_eq!(config.generation, "v7");
        assert_eq!(config.shell_path, "/index.html");
        assert_eq!(config.origin.as_str(), "https://app.example/");
    }
}
