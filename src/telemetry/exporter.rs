//! Span exporters: the last hop before spans leave the process.
//!
//! Exporters run on the provider's background task, never on a request
//! path. A failed export is reported to the caller (which logs it) and the
//! spans are discarded. Nothing is retried.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{StatusCode, Uri};
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::info;

use crate::telemetry::otlp;
use crate::telemetry::span::SpanData;

/// The future returned by [`SpanExporter::export`].
pub type ExportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;

/// A destination for finished spans.
pub trait SpanExporter: Send + Sync + 'static {
    fn export(&self, spans: Vec<SpanData>) -> ExportFuture<'_>;

    /// Called once, after the last `export`, when the provider shuts down.
    fn shutdown(&self) {}
}

#[derive(Debug)]
pub enum ExportError {
    InvalidEndpoint(http::uri::InvalidUri),
    /// The endpoint is not a plain `http://` URL.
    UnsupportedScheme(String),
    Request(http::Error),
    Encode(serde_json::Error),
    Transport(hyper_util::client::legacy::Error),
    Status(StatusCode),
    Timeout(Duration),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEndpoint(e) => write!(f, "invalid collector endpoint: {e}"),
            Self::UnsupportedScheme(endpoint) => {
                write!(f, "collector endpoint `{endpoint}` must start with http://")
            }
            Self::Request(e) => write!(f, "building export request: {e}"),
            Self::Encode(e) => write!(f, "encoding spans: {e}"),
            Self::Transport(e) => write!(f, "sending spans: {e}"),
            Self::Status(s) => write!(f, "collector answered {s}"),
            Self::Timeout(d) => write!(f, "collector did not answer within {d:?}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidEndpoint(e) => Some(e),
            Self::Request(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::UnsupportedScheme(_) | Self::Status(_) | Self::Timeout(_) => None,
        }
    }
}

// ── OTLP over HTTP ────────────────────────────────────────────────────────────

/// Sends OTLP/JSON to `{endpoint}/v1/traces`.
pub struct OtlpHttpExporter {
    client: Client<HttpConnector, Full<Bytes>>,
    uri: Uri,
    timeout: Duration,
}

impl OtlpHttpExporter {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// `endpoint` is the collector base URL, e.g. `http://collector:4318`.
    ///
    /// Only plain `http://` endpoints are reachable; TLS is terminated by
    /// the collector's sidecar or ingress. Any other scheme is rejected here
    /// rather than failing every export later.
    pub fn new(endpoint: &str) -> Result<Self, ExportError> {
        let uri: Uri = traces_uri(endpoint).parse().map_err(ExportError::InvalidEndpoint)?;
        if uri.scheme_str() != Some("http") || uri.host().is_none() {
            return Err(ExportError::UnsupportedScheme(endpoint.to_owned()));
        }
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { client, uri, timeout: Self::DEFAULT_TIMEOUT })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    async fn send(&self, spans: Vec<SpanData>) -> Result<(), ExportError> {
        let body = serde_json::to_vec(&otlp::encode(spans)).map_err(ExportError::Encode)?;
        let req = http::Request::post(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(ExportError::Request)?;

        let res = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| ExportError::Timeout(self.timeout))?
            .map_err(ExportError::Transport)?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(ExportError::Status(res.status()))
        }
    }
}

impl SpanExporter for OtlpHttpExporter {
    fn export(&self, spans: Vec<SpanData>) -> ExportFuture<'_> {
        Box::pin(self.send(spans))
    }
}

/// The signal-specific path is appended to the base endpoint, as the OTLP
/// exporter configuration prescribes for `OTEL_EXPORTER_OTLP_ENDPOINT`.
fn traces_uri(endpoint: &str) -> String {
    format!("{}/v1/traces", endpoint.trim_end_matches('/'))
}

// ── Console ───────────────────────────────────────────────────────────────────

/// Writes one structured log event per span.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleExporter;

impl SpanExporter for ConsoleExporter {
    fn export(&self, spans: Vec<SpanData>) -> ExportFuture<'_> {
        for span in &spans {
            let cx = &span.span_context;
            let duration = span.end_time.duration_since(span.start_time).unwrap_or_default();
            let attributes = span
                .attributes
                .iter()
                .map(|kv| format!("{}={}", kv.key, kv.value))
                .collect::<Vec<_>>()
                .join(" ");
            info!(
                target: "lower::spans",
                trace_id = %cx.trace_id(),
                span_id = %cx.span_id(),
                parent_span_id = ?span.parent_span_id.map(|id| id.to_string()),
                kind = ?span.kind,
                status = ?span.status,
                duration_us = duration.as_micros() as u64,
                attributes = %attributes,
                "{}",
                span.name,
            );
        }
        Box::pin(async { Ok(()) })
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Keeps every exported span in memory. Clones share the same storage, so a
/// test can hand one clone to the provider and inspect another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    shut_down: Arc<Mutex<bool>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.lock().map(|s| *s).unwrap_or(false)
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&self, spans: Vec<SpanData>) -> ExportFuture<'_> {
        if let Ok(mut stored) = self.spans.lock() {
            stored.extend(spans);
        }
        Box::pin(async { Ok(()) })
    }

    fn shutdown(&self) {
        if let Ok(mut flag) = self.shut_down.lock() {
            *flag = true;
        }
    }
}
