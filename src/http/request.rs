//! Intercepted requests.

use std::fmt;

use url::Url;

use super::{Headers, Method, header_names};

/// How the host issued a request, mirroring the fetch API's `request.mode`.
///
/// Routing only distinguishes [`RequestMode::Navigate`] from everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestMode {
    /// Loading a new top-level document.
    Navigate,
    #[default]
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::SameOrigin => "same-origin",
            Self::NoCors => "no-cors",
            Self::Cors => "cors",
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as seen by the interceptor: method, absolute URL, mode and headers.
///
/// # Examples
///
/// ```
/// use shellcache::http::{Method, Request, RequestMode};
/// use url::Url;
///
/// let url = Url::parse("https://app.example/settings").unwrap();
/// let request = Request::navigate(url).header("Accept", "text/html");
///
/// assert_eq!(request.method(), &Method::Get);
/// assert!(request.is_navigation());
/// assert_eq!(request.headers().get("accept"), Some("text/html"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: Url,
    mode: RequestMode,
    headers: Headers,
}

impl Request {
    /// Creates a request with the given method and URL, default mode and no headers.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: RequestMode::default(),
            headers: Headers::new(),
        }
    }

    /// Creates a `GET` subresource request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Creates a `GET` navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_mode(RequestMode::Navigate)
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns a copy of this request that asks the origin to answer
    /// `304 Not Modified` while `etag` still identifies the current content.
    pub fn conditional(&self, etag: &str) -> Self {
        let mut request = self.clone();
        request.headers.set(header_names::IF_NONE_MATCH, etag);
        request
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn default_mode_is_subresource() {
        let req = Request::get(url("https://app.example/app.js"));
        assert_eq!(req.mode(), RequestMode::SameOrigin);
        assert!(!req.is_navigation());
    }

    #[test]
    fn conditional_sets_single_validator() {
        let req = Request::navigate(url("https://app.example/"))
            .header("If-None-Match", "\"stale\"")
            .header("Accept", "text/html");
        let cond = req.conditional("\"v1\"");

        let validators: Vec<_> = cond.headers().get_all("if-none-match").collect();
        assert_eq!(validators, vec!["\"v1\""]);
        assert_eq!(cond.headers().get("accept"), Some("text/html"));
        assert_eq!(cond.url(), req.url());
        assert!(cond.is_navigation());
    }

    #[test]
    fn conditional_leaves_source_request_untouched() {
        let req = Request::navigate(url("https://app.example/"));
        let _ = req.conditional("\"v1\"");
        assert!(!req.headers().contains("if-none-match"));
    }
}
