//! A scripted in-process origin.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::trace;
use url::Url;

use super::{Network, NetworkError};
use crate::http::{Request, Response, StatusCode, header_names};

/// An origin that answers from a table of resources and records every call.
///
/// Resources registered with [`serve`](Self::serve) behave like a real
/// origin with strong validators: a request whose `If-None-Match` equals the
/// resource's current ETag gets `304 Not Modified`. Fixed responses
/// registered with [`respond`](Self::respond) are returned verbatim.
/// Unknown paths get `404 Not Found`.
///
/// # Examples
///
/// ```
/// use shellcache::http::{Request, StatusCode};
/// use shellcache::network::{Network, ScriptedNetwork};
/// use url::Url;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let origin = ScriptedNetwork::new();
/// origin.serve("/index.html", "<p>v1</p>", Some("\"v1\""));
///
/// let url = Url::parse("https://app.example/index.html").unwrap();
/// let fresh = origin.fetch(&Request::get(url.clone())).await.unwrap();
/// assert_eq!(fresh.status(), StatusCode::OK);
///
/// let revalidated = origin
///     .fetch(&Request::get(url).header("If-None-Match", "\"v1\""))
///     .await
///     .unwrap();
/// assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
/// assert_eq!(origin.call_count(), 2);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, Route>,
    offline: bool,
    /// Calls left to reject before answering normally again.
    reject_next: usize,
    calls: Vec<Request>,
}

#[derive(Debug, Clone)]
enum Route {
    Resource { body: String, etag: Option<String> },
    Fixed(Response),
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serves `body` at `path` with an optional validator, replacing whatever
    /// was there before.
    pub fn serve(&self, path: &str, body: impl Into<String>, etag: Option<&str>) {
        self.state().routes.insert(
            path.to_owned(),
            Route::Resource {
                body: body.into(),
                etag: etag.map(str::to_owned),
            },
        );
    }

    /// Answers every request for `path` with `response`, ignoring validators.
    pub fn respond(&self, path: &str, response: Response) {
        self.state()
            .routes
            .insert(path.to_owned(), Route::Fixed(response));
    }

    /// Makes every subsequent call fail as [`NetworkError::Unreachable`].
    pub fn go_offline(&self) {
        self.state().offline = true;
    }

    pub fn go_online(&self) {
        self.state().offline = false;
    }

    /// Rejects the next `count` calls, then answers normally again.
    pub fn reject_next(&self, count: usize) {
        self.state().reject_next = count;
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<Request> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn answer(state: &State, request: &Request) -> Response {
        let Some(route) = state.routes.get(&route_key(request.url())) else {
            return Response::new(StatusCode::NOT_FOUND).body("not found");
        };
        match route {
            Route::Fixed(response) => response.clone(),
            Route::Resource { body, etag } => {
                let presented = request.headers().get(header_names::IF_NONE_MATCH);
                if let (Some(current), Some(presented)) = (etag.as_deref(), presented) {
                    if current == presented {
                        return Response::new(StatusCode::NOT_MODIFIED)
                            .header(header_names::ETAG, current);
                    }
                }
                let mut response = Response::new(StatusCode::OK)
                    .header(header_names::CONTENT_TYPE, "text/html; charset=utf-8");
                if let Some(etag) = etag {
                    response = response.header(header_names::ETAG, etag.as_str());
                }
                response.body(body.clone())
            }
        }
    }
}

fn route_key(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut state = self.state();
        state.calls.push(request.clone());

        if state.offline {
            return Err(NetworkError::Unreachable {
                url: request.url().to_string(),
            });
        }
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Err(NetworkError::Rejected {
                url: request.url().to_string(),
                reason: "scripted rejection".into(),
            });
        }

        let response = Self::answer(&state, request);
        trace!(url = %request.url(), status = %response.status(), "scripted response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://app.example").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let origin = ScriptedNetwork::new();
        let res = origin.fetch(&Request::get(url("/nope"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stale_validator_gets_full_body() {
        let origin = ScriptedNetwork::new();
        origin.serve("/", "new", Some("\"v2\""));
        let res = origin
            .fetch(&Request::get(url("/")).header("If-None-Match", "\"v1\""))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.etag(), Some("\"v2\""));
        assert_eq!(res.body_bytes().as_ref(), b"new");
    }

    #[tokio::test]
    async fn resource_without_etag_never_304s() {
        let origin = ScriptedNetwork::new();
        origin.serve("/", "body", None);
        let res = origin
            .fetch(&Request::get(url("/")).header("If-None-Match", "\"v1\""))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.etag(), None);
    }

    #[tokio::test]
    async fn offline_and_rejections_are_logged() {
        let origin = ScriptedNetwork::new();
        origin.serve("/", "body", None);
        origin.reject_next(1);
        assert!(matches!(
            origin.fetch(&Request::get(url("/"))).await,
            Err(NetworkError::Rejected { .. })
        ));
        assert!(origin.fetch(&Request::get(url("/"))).await.is_ok());

        origin.go_offline();
        assert!(matches!(
            origin.fetch(&Request::get(url("/"))).await,
            Err(NetworkError::Unreachable { .. })
        ));
        assert_eq!(origin.call_count(), 3);
    }
}
