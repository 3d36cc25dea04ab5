//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup via [`matchit`]. You
//! register a path, you get a handler. That is all.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};

/// The application router.
///
/// Build it once at startup; pass it to
/// [`Server::serve`](crate::Server::serve). Each registration returns
/// `self` so routes chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax and are retrieved with
    /// `req.param("name")`:
    ///
    /// ```rust,no_run
    /// # use http::Method;
    /// # use zipline::{Request, Response, Router};
    /// # async fn download(_: Request) -> Response { Response::text("") }
    /// Router::new().on(Method::GET, "/archive/{identifier}/", download);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route pattern. Route tables are
    /// static program structure; a bad pattern is a programming error
    /// caught at startup, not a runtime condition.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Shorthand for [`on`](Self::on) with `GET`.
    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};

    async fn dummy(_req: Request) -> Response {
        Response::text("ok")
    }

    #[test]
    fn lookup_captures_path_parameters() {
        let router = Router::new().get("/archive/{identifier}/", dummy);

        let (_, params) = router.lookup(&Method::GET, "/archive/abc123/").unwrap();
        assert_eq!(params.get("identifier").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn unknown_path_and_method_miss() {
        let router = Router::new().get("/archive/{identifier}/", dummy);

        assert!(router.lookup(&Method::GET, "/archive/abc123").is_none());
        assert!(router.lookup(&Method::GET, "/nope").is_none());
        assert!(router.lookup(&Method::POST, "/archive/abc123/").is_none());
    }
}
