//! HTTP responses as returned by the network and stored in a cache.
//!
//! Bodies are [`Bytes`], so cloning a response (to hand one copy to the
//! requester and store the other) never copies the payload.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode, header_names};

/// An HTTP response.
///
/// # Examples
///
/// ```
/// use shellcache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("ETag", "\"v1\"")
///     .body("<!doctype html>");
///
/// assert!(response.is_success());
/// assert_eq!(response.etag(), Some("\"v1\""));
/// assert_eq!(response.body_bytes().as_ref(), b"<!doctype html>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Assembles a response from already-parsed parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns `true` for `2xx` statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns the validator token (`ETag`), if the origin sent one.
    ///
    /// An empty header value counts as absent.
    pub fn etag(&self) -> Option<&str> {
        self.headers
            .get(header_names::ETAG)
            .filter(|etag| !etag.is_empty())
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// `Content-Length` is always written last and reflects the actual body,
    /// replacing any value the origin sent.
    pub fn to_wire(&self) -> BytesMut {
        let estimated_size = 128 + self.headers.len() * 64 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        let reason = self.status.canonical_reason().unwrap_or("");
        buf.put(format!("HTTP/1.1 {} {reason}\r\n", self.status.as_u16()).as_bytes());

        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case(header_names::CONTENT_LENGTH) {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("{}: {}\r\n", header_names::CONTENT_LENGTH, self.body.len()).as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);
        buf.put(&self.body[..]);

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn wire_format_status_line_and_length() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.to_wire());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn wire_format_replaces_stale_content_length() {
        let r = Response::new(StatusCode::OK)
            .header("content-length", "999")
            .body("abc");
        let s = to_string(r.to_wire());
        assert!(!s.contains("999"));
        assert!(s.contains("Content-Length: 3\r\n"));
    }

    #[test]
    fn unknown_status_has_empty_reason() {
        let r = Response::new(StatusCode::from_u16(418));
        let s = to_string(r.to_wire());
        assert!(s.starts_with("HTTP/1.1 418 \r\n"));
    }

    #[test]
    fn empty_etag_is_absent() {
        let r = Response::new(StatusCode::OK).header("ETag", "");
        assert_eq!(r.etag(), None);
    }

    #[test]
    fn clone_shares_body() {
        let r = Response::new(StatusCode::OK).body(vec![1u8; 1024]);
        let copy = r.clone();
        assert_eq!(copy.body_bytes().as_ptr(), r.body_bytes().as_ptr());
    }
}
