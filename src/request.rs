//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

/// An incoming HTTP request with its body fully read.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: HashMap::new(),
        }
    }

    /// Starts building a request by hand, for tests and in-process calls.
    pub fn builder(method: Method, uri: &str) -> RequestBuilder {
        RequestBuilder {
            method,
            uri: uri.parse(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Fluent builder returned by [`Request::builder`].
pub struct RequestBuilder {
    method: Method,
    uri: Result<Uri, http::uri::InvalidUri>,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestBuilder {
    /// Adds a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<Request, http::uri::InvalidUri> {
        Ok(Request {
            method: self.method,
            uri: self.uri?,
            headers: self.headers,
            body: self.body,
            params: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_accessors() {
        let req = Request::builder(Method::GET, "/search?q=a")
            .header("X-Thing", "1")
            .body("hi")
            .build()
            .unwrap();
        assert_eq!(*req.method(), Method::GET);
        assert_eq!(req.path(), "/search");
        assert_eq!(req.uri().to_string(), "/search?q=a");
        assert_eq!(req.header("x-thing"), Some("1"));
        assert_eq!(req.header("X-THING"), Some("1"));
        assert_eq!(req.body(), b"hi");
        assert_eq!(req.param("id"), None);
    }

    #[test]
    fn invalid_uri_is_an_error() {
        assert!(Request::builder(Method::GET, "not a uri").build().is_err());
    }
}
