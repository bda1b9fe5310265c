//! Per-request server spans.
//!
//! For each request [`TracingMiddleware`]:
//!
//! 1. extracts the caller's trace context from the headers (a missing or
//!    malformed `traceparent` just means "start a new trace"),
//! 2. makes that context current and starts a `Server` span named after the
//!    request path, tagged with `component`, `http.method`, `http.route` and
//!    `http.url`,
//! 3. runs the rest of the chain with the new span current, so downstream
//!    code can parent its own spans or inject headers into outbound calls,
//! 4. on success records `http.status_code`, ends the span and returns the
//!    response untouched; on failure marks the span as errored, ends it and
//!    returns the same error.
//!
//! The span is ended exactly once on every path. If the handler panics or
//! the request future is dropped mid-flight, the span's own `Drop` ends it.

use std::sync::Arc;

use tracing::debug;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::telemetry::attribute::{COMPONENT, HTTP_METHOD, HTTP_ROUTE, HTTP_STATUS_CODE, HTTP_URL};
use crate::telemetry::{global, Context, KeyValue, SpanKind, TextMapPropagator, Tracer};

/// Instrumentation scope reported on every server span.
pub const SCOPE_NAME: &str = "lower.http";
pub const SCOPE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct TracingMiddleware {
    tracer: Tracer,
    propagator: Arc<dyn TextMapPropagator>,
}

impl TracingMiddleware {
    /// Traces with `tracer` and the process-wide propagator.
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer, propagator: global::text_map_propagator() }
    }

    /// Traces with the process-wide provider and propagator.
    pub fn from_global() -> Self {
        Self::new(global::tracer(SCOPE_NAME, Some(SCOPE_VERSION)))
    }

    pub fn with_propagator(mut self, propagator: impl TextMapPropagator) -> Self {
        self.propagator = Arc::new(propagator);
        self
    }
}

impl Middleware for TracingMiddleware {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let parent = self.propagator.extract(req.headers());
        let tracer = self.tracer.clone();

        Box::pin(parent.scope(async move {
            let mut span = tracer
                .span_builder(req.path().to_owned())
                .with_kind(SpanKind::Server)
                .with_attributes([
                    KeyValue::new(COMPONENT, "http"),
                    KeyValue::new(HTTP_METHOD, req.method().to_string()),
                    KeyValue::new(HTTP_ROUTE, req.path().to_owned()),
                    KeyValue::new(HTTP_URL, req.uri().to_string()),
                ])
                .start(&tracer);

            let cx = Context::current().with_span_context(span.span_context().clone());
            debug!(
                trace_id = %span.span_context().trace_id(),
                span_id = %span.span_context().span_id(),
                remote_parent = Context::current().has_active_span(),
                "server span started"
            );

            match cx.scope(next.run(req)).await {
                Ok(res) => {
                    span.set_attribute(HTTP_STATUS_CODE, res.status_code().as_u16());
                    span.end();
                    Ok(res)
                }
                Err(e) => {
                    span.record_error(&*e);
                    span.end();
                    Err(e)
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;
    use crate::telemetry::{InMemoryExporter, SpanStatus, TracerProvider};
    use crate::{Request, Response, Router};

    async fn traced(router: Router, req: Request) -> (crate::handler::Outcome, InMemoryExporter) {
        let exporter = InMemoryExporter::new();
        let provider = TracerProvider::builder().with_exporter(exporter.clone()).build();
        let app = router
            .layer(TracingMiddleware::new(provider.tracer(SCOPE_NAME, Some(SCOPE_VERSION))))
            .into_app();
        let outcome = app.call(req).await;
        provider.force_flush().await;
        (outcome, exporter)
    }

    fn get(uri: &str) -> Request {
        Request::builder(Method::GET, uri).build().unwrap()
    }

    #[tokio::test]
    async fn tags_span_with_request_fields() {
        async fn ok(_: Request) -> Response { Response::text("ok") }
        let router = Router::new().on(Method::GET, "/items/{id}", ok);

        let (outcome, exporter) = traced(router, get("/items/7?full=1")).await;
        assert_eq!(outcome.unwrap().status_code(), StatusCode::OK);

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "/items/7");
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.attribute(COMPONENT).and_then(|v| v.as_str()), Some("http"));
        assert_eq!(span.attribute(HTTP_METHOD).and_then(|v| v.as_str()), Some("GET"));
        assert_eq!(span.attribute(HTTP_ROUTE).and_then(|v| v.as_str()), Some("/items/7"));
        assert_eq!(span.attribute(HTTP_URL).and_then(|v| v.as_str()), Some("/items/7?full=1"));
        assert_eq!(span.attribute(HTTP_STATUS_CODE).and_then(|v| v.as_i64()), Some(200));
        assert_eq!(span.status, SpanStatus::Unset);
        assert_eq!(span.scope.name, SCOPE_NAME);
    }

    #[tokio::test]
    async fn response_passes_through_unchanged() {
        fn letter() -> Response {
            Response::builder()
                .status(StatusCode::CREATED)
                .header("x-letter", "q")
                .header("cache-control", "no-store")
                .json(br#"{"char":"q"}"#.to_vec())
        }
        async fn created(_: Request) -> Response { letter() }
        let router = Router::new().on(Method::GET, "/", created);

        let (outcome, exporter) = traced(router, get("/")).await;
        assert_eq!(outcome.unwrap(), letter());

        let spans = exporter.finished_spans();
        assert_eq!(spans[0].attribute(HTTP_STATUS_CODE).and_then(|v| v.as_i64()), Some(201));
    }

    #[tokio::test]
    async fn unmatched_route_is_traced_as_404() {
        let (outcome, exporter) = traced(Router::new(), get("/missing")).await;
        assert_eq!(outcome.unwrap().status_code(), StatusCode::NOT_FOUND);

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].attribute(HTTP_STATUS_CODE).and_then(|v| v.as_i64()), Some(404));
    }

    #[tokio::test]
    async fn handler_error_ends_span_and_propagates() {
        async fn boom(_: Request) -> Result<Response, std::io::Error> {
            Err(std::io::Error::other("disk on fire"))
        }
        let router = Router::new().on(Method::GET, "/", boom);

        let (outcome, exporter) = traced(router, get("/")).await;
        let err = outcome.unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].attribute(HTTP_STATUS_CODE).is_none());
        assert_eq!(spans[0].status, SpanStatus::error("disk on fire"));
    }

    #[tokio::test]
    async fn downstream_sees_server_span_as_current() {
        async fn echo_context(_: Request) -> Response {
            let cx = Context::current();
            let span = cx.span_context().cloned();
            Response::text(span.map(|s| format!("{}-{}", s.trace_id(), s.span_id())).unwrap_or_default())
        }
        let router = Router::new().on(Method::GET, "/", echo_context);

        let (outcome, exporter) = traced(router, get("/")).await;
        let body = outcome.unwrap().body().to_vec();

        let span = &exporter.finished_spans()[0];
        let expected = format!("{}-{}", span.span_context.trace_id(), span.span_context.span_id());
        assert_eq!(String::from_utf8(body).unwrap(), expected);
    }

    #[tokio::test]
    async fn does_not_touch_incoming_headers() {
        async fn count_headers(req: Request) -> String { req.headers().len().to_string() }
        let router = Router::new().on(Method::GET, "/", count_headers);
        let req = Request::builder(Method::GET, "/")
            .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
            .build()
            .unwrap();

        let (outcome, _) = traced(router, req).await;
        assert_eq!(outcome.unwrap().body(), b"1");
    }
}
