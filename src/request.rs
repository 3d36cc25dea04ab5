//! Incoming HTTP request type.

use std::collections::HashMap;

use http::{HeaderMap, Method, Uri};
use hyper::body::Incoming;

/// An incoming HTTP request plus the path parameters its route captured.
pub struct Request {
    inner: http::Request<Incoming>,
    params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(inner: http::Request<Incoming>, params: HashMap<String, String>) -> Self {
        Self { inner, params }
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Case-insensitive header lookup, `None` for absent or non-UTF-8
    /// values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/archive/{identifier}/`, `req.param("identifier")` on
    /// `/archive/abc123/` returns `Some("abc123")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
