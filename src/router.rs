//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. You register a path, you
//! get a handler; you register a middleware, it wraps every request.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::middleware::{Chain, Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup, then pass it to [`Server::serve`](crate::Server::serve)
/// or freeze it with [`Router::into_app`]. Each builder call returns `self`
/// so registrations chain naturally.
pub struct Router {
    routes: RouteTable,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: RouteTable { routes: HashMap::new() }, middleware: Vec::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use http::Method;
    /// # use lower::{Request, Response, Router};
    /// # async fn letter(_: Request) -> Response { Response::text("") }
    /// # async fn item(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET, "/",            letter)
    ///     .on(Method::GET, "/items/{id}",  item);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Wrap every request in `middleware`. The first layer added is the
    /// outermost: it sees the request first and the outcome last.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Freezes the router into a cheaply cloneable, callable [`App`].
    pub fn into_app(self) -> App {
        App {
            chain: Arc::new(Chain {
                middleware: self.middleware.into_boxed_slice(),
                endpoint: Arc::new(self.routes),
            }),
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// A frozen router: middleware chain plus route table.
#[derive(Clone)]
pub struct App {
    chain: Arc<Chain>,
}

impl App {
    /// Runs `req` through the middleware chain and route dispatch.
    pub fn call(&self, req: Request) -> BoxFuture {
        Next::new(Arc::clone(&self.chain)).run(req)
    }
}

/// The last link of the chain: route lookup and handler dispatch.
struct RouteTable {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl RouteTable {
    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl ErasedHandler for RouteTable {
    fn call(&self, mut req: Request) -> BoxFuture {
        match self.lookup(&req.method, req.uri.path()) {
            Some((handler, params)) => {
                req.params = params;
                handler.call(req)
            }
            None => Box::pin(async { Ok(Response::status(StatusCode::NOT_FOUND)) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Outcome;

    async fn item(req: Request) -> String {
        format!("item {}", req.param("id").unwrap_or("?"))
    }

    fn get(uri: &str) -> Request {
        Request::builder(Method::GET, uri).build().unwrap()
    }

    #[tokio::test]
    async fn dispatches_with_params() {
        let app = Router::new().on(Method::GET, "/items/{id}", item).into_app();
        let res = app.call(get("/items/42")).await.unwrap();
        assert_eq!(res.body(), b"item 42");
    }

    #[tokio::test]
    async fn unknown_path_or_method_is_404() {
        let app = Router::new().on(Method::GET, "/items/{id}", item).into_app();
        assert_eq!(app.call(get("/nope")).await.unwrap().status_code(), StatusCode::NOT_FOUND);

        let post = Request::builder(Method::POST, "/items/1").build().unwrap();
        assert_eq!(app.call(post).await.unwrap().status_code(), StatusCode::NOT_FOUND);
    }

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(&self, req: Request, next: Next) -> BoxFuture {
            let tag = self.0;
            Box::pin(async move {
                let res: Outcome = next.run(req).await;
                res.map(|r| {
                    let body = format!("{tag}({})", String::from_utf8_lossy(r.body()));
                    Response::text(body)
                })
            })
        }
    }

    #[tokio::test]
    async fn first_layer_is_outermost() {
        let app = Router::new()
            .on(Method::GET, "/", |_req: Request| async { "core" })
            .layer(Tag("outer"))
            .layer(Tag("inner"))
            .into_app();
        let res = app.call(get("/")).await.unwrap();
        assert_eq!(res.body(), b"outer(inner(core))");
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_route_panics() {
        async fn a(_: Request) -> &'static str { "a" }
        let _ = Router::new().on(Method::GET, "/x", a).on(Method::GET, "/x", a);
    }
}
