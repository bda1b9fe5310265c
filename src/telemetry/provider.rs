//! Tracer provider, tracers and the span export queue.
//!
//! # Getting spans off the request path
//!
//! Ending a span must never wait on the network. [`Span::end`] therefore only
//! does a `try_send` into a bounded channel; a background task owns the
//! exporter and drains the channel:
//!
//! ```text
//! request task ── Span::end ──try_send──▶ [ mpsc, 2048 ] ──▶ export task ──▶ exporter
//!                                   full? drop + count
//! ```
//!
//! The channel also carries flush and shutdown markers. Because it is FIFO,
//! a flush is acknowledged only after every span queued before it has been
//! handed to the exporter.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::telemetry::context::{Context, SpanContext, TraceState};
use crate::telemetry::exporter::SpanExporter;
use crate::telemetry::id::{SpanId, TraceFlags, TraceId};
use crate::telemetry::span::{
    InstrumentationScope, KeyValue, Resource, Span, SpanData, SpanKind, SpanStatus,
};

/// Default capacity of the export queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;

/// Upper bound on spans handed to the exporter in one call.
const MAX_EXPORT_BATCH: usize = 512;

enum Message {
    Export(SpanData),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct Queue {
    tx: mpsc::Sender<Message>,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct ProviderInner {
    resource: Arc<Resource>,
    queue: Option<Queue>,
}

impl ProviderInner {
    pub(crate) fn is_exporting(&self) -> bool {
        self.queue.is_some()
    }

    /// Hands a finished span to the export task without waiting.
    pub(crate) fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }
        let Some(queue) = &self.queue else { return };
        if let Err(e) = queue.tx.try_send(Message::Export(span)) {
            let dropped = queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "provider shut down",
            };
            debug!(dropped, reason, "span dropped");
        }
    }
}

/// Owns the export pipeline and hands out [`Tracer`]s.
///
/// Cloning is cheap; all clones share one pipeline.
#[derive(Clone)]
pub struct TracerProvider {
    inner: Arc<ProviderInner>,
}

impl TracerProvider {
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder {
            resource: Resource::for_service(env!("CARGO_PKG_NAME")),
            exporter: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// A provider without an exporter. Spans are created, propagated and
    /// ended as usual, then discarded.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                resource: Arc::new(Resource::default()),
                queue: None,
            }),
        }
    }

    pub fn tracer(
        &self,
        name: impl Into<Cow<'static, str>>,
        version: Option<impl Into<Cow<'static, str>>>,
    ) -> Tracer {
        Tracer {
            scope: InstrumentationScope { name: name.into(), version: version.map(Into::into) },
            provider: Arc::clone(&self.inner),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Spans discarded because the queue was full or already closed.
    pub fn dropped_spans(&self) -> u64 {
        self.inner.queue.as_ref().map_or(0, |q| q.dropped.load(Ordering::Relaxed))
    }

    /// Resolves once every span ended before this call has been exported.
    pub async fn force_flush(&self) {
        let Some(queue) = &self.inner.queue else { return };
        let (ack, done) = oneshot::channel();
        if queue.tx.send(Message::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Exports everything still queued, shuts the exporter down and stops
    /// the export task. Later spans are dropped. Safe to call more than once.
    pub async fn shutdown(&self) {
        let Some(queue) = &self.inner.queue else { return };
        let (ack, done) = oneshot::channel();
        if queue.tx.send(Message::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        let worker = queue.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("span export task failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for TracerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracerProvider")
            .field("resource", &self.inner.resource)
            .field("exporting", &self.inner.is_exporting())
            .finish()
    }
}

pub struct TracerProviderBuilder {
    resource: Resource,
    exporter: Option<Box<dyn SpanExporter>>,
    queue_capacity: usize,
}

impl TracerProviderBuilder {
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_exporter(mut self, exporter: impl SpanExporter) -> Self {
        self.exporter = Some(Box::new(exporter));
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Builds the provider and, if an exporter was set, spawns its export
    /// task.
    ///
    /// # Panics
    ///
    /// Panics if an exporter was set and this is called outside a tokio
    /// runtime.
    pub fn build(self) -> TracerProvider {
        let queue = self.exporter.map(|exporter| {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            let worker = tokio::spawn(run_exporter(rx, exporter));
            Queue { tx, dropped: AtomicU64::new(0), worker: Mutex::new(Some(worker)) }
        });
        TracerProvider {
            inner: Arc::new(ProviderInner { resource: Arc::new(self.resource), queue }),
        }
    }
}

async fn run_exporter(mut rx: mpsc::Receiver<Message>, exporter: Box<dyn SpanExporter>) {
    let mut inbox = Vec::with_capacity(MAX_EXPORT_BATCH);
    while rx.recv_many(&mut inbox, MAX_EXPORT_BATCH).await > 0 {
        let mut batch = Vec::new();
        for msg in inbox.drain(..) {
            match msg {
                Message::Export(span) => batch.push(span),
                Message::Flush(ack) => {
                    export(exporter.as_ref(), std::mem::take(&mut batch)).await;
                    let _ = ack.send(());
                }
                Message::Shutdown(ack) => {
                    export(exporter.as_ref(), std::mem::take(&mut batch)).await;
                    exporter.shutdown();
                    let _ = ack.send(());
                    debug!("span export task stopped");
                    return;
                }
            }
        }
        export(exporter.as_ref(), batch).await;
    }
    // Every sender is gone: the provider was dropped without `shutdown`.
    exporter.shutdown();
}

async fn export(exporter: &dyn SpanExporter, batch: Vec<SpanData>) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    match exporter.export(batch).await {
        Ok(()) => debug!(count, "spans exported"),
        Err(e) => warn!(count, "span export failed: {e}"),
    }
}

// ── Tracer ────────────────────────────────────────────────────────────────────

/// Creates spans on behalf of one instrumentation scope.
#[derive(Clone)]
pub struct Tracer {
    scope: InstrumentationScope,
    provider: Arc<ProviderInner>,
}

impl Tracer {
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder {
        SpanBuilder { name: name.into(), kind: SpanKind::Internal, attributes: Vec::new() }
    }

    /// Starts an internal span under [`Context::current`].
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.span_builder(name).start(self)
    }

    /// Starts a span from `builder` as a child of `parent`'s span, or as the
    /// root of a new trace when `parent` has none.
    ///
    /// Sampling is parent-based: roots are sampled, children inherit the
    /// parent's sampled flag.
    pub fn build_with_context(&self, builder: SpanBuilder, parent: &Context) -> Span {
        let (trace_id, flags, trace_state, parent_span_id) = match parent.span_context() {
            Some(p) if p.is_valid() => {
                (p.trace_id(), p.trace_flags(), p.trace_state().clone(), Some(p.span_id()))
            }
            _ => (TraceId::random(), TraceFlags::SAMPLED, TraceState::default(), None),
        };
        let span_context = SpanContext::new(trace_id, SpanId::random(), flags, false, trace_state);
        let now = SystemTime::now();

        Span::new(
            SpanData {
                span_context,
                parent_span_id,
                name: builder.name,
                kind: builder.kind,
                start_time: now,
                end_time: now,
                attributes: builder.attributes,
                status: SpanStatus::Unset,
                scope: self.scope.clone(),
                resource: Arc::clone(&self.provider.resource),
            },
            Some(Arc::clone(&self.provider)),
        )
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer").field("scope", &self.scope).finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct SpanBuilder {
    name: Cow<'static, str>,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
}

impl SpanBuilder {
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn start(self, tracer: &Tracer) -> Span {
        tracer.build_with_context(self, &Context::current())
    }

    pub fn start_with_context(self, tracer: &Tracer, parent: &Context) -> Span {
        tracer.build_with_context(self, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::exporter::InMemoryExporter;

    fn provider(exporter: &InMemoryExporter) -> TracerProvider {
        TracerProvider::builder().with_exporter(exporter.clone()).build()
    }

    fn remote(flags: TraceFlags) -> Context {
        Context::new().with_span_context(SpanContext::new(
            TraceId::from_bytes([7; 16]),
            SpanId::from_bytes([9; 8]),
            flags,
            true,
            TraceState::default(),
        ))
    }

    #[tokio::test]
    async fn root_span_starts_new_trace() {
        let exporter = InMemoryExporter::new();
        let provider = provider(&exporter);
        let tracer = provider.tracer("test", None::<&str>);

        tracer.start("root").end();
        provider.force_flush().await;

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].parent_span_id, None);
        assert!(spans[0].span_context.is_sampled());
        assert!(!spans[0].span_context.is_remote());
    }

    #[tokio::test]
    async fn child_inherits_trace_and_parent() {
        let exporter = InMemoryExporter::new();
        let provider = provider(&exporter);
        let tracer = provider.tracer("test", Some("1.0"));

        tracer.span_builder("child").start_with_context(&tracer, &remote(TraceFlags::SAMPLED)).end();
        provider.force_flush().await;

        let span = &exporter.finished_spans()[0];
        assert_eq!(span.span_context.trace_id(), TraceId::from_bytes([7; 16]));
        assert_eq!(span.parent_span_id, Some(SpanId::from_bytes([9; 8])));
        assert_ne!(span.span_context.span_id(), SpanId::from_bytes([9; 8]));
        assert_eq!(span.scope.version.as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn unsampled_parent_is_not_exported() {
        let exporter = InMemoryExporter::new();
        let provider = provider(&exporter);
        let tracer = provider.tracer("test", None::<&str>);

        let span = tracer.span_builder("child").start_with_context(&tracer, &remote(TraceFlags::NOT_SAMPLED));
        assert!(!span.is_recording());
        span.end();
        provider.force_flush().await;

        assert!(exporter.finished_spans().is_empty());
    }

    #[tokio::test]
    async fn dropped_span_is_ended_once() {
        let exporter = InMemoryExporter::new();
        let provider = provider(&exporter);
        let tracer = provider.tracer("test", None::<&str>);

        {
            let mut span = tracer.start("dropped");
            span.set_attribute("k", "v");
        }
        provider.force_flush().await;

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Unset);
        assert_eq!(spans[0].attribute("k").and_then(|v| v.as_str()), Some("v"));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let exporter = InMemoryExporter::new();
        let provider = TracerProvider::builder()
            .with_exporter(exporter.clone())
            .with_queue_capacity(1)
            .build();
        let tracer = provider.tracer("test", None::<&str>);

        // Nothing yields between these calls, so the export task cannot
        // drain the single-slot queue in the meantime.
        for _ in 0..10 {
            tracer.start("burst").end();
        }
        assert_eq!(provider.dropped_spans(), 9);

        provider.force_flush().await;
        assert_eq!(exporter.finished_spans().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_and_is_idempotent() {
        let exporter = InMemoryExporter::new();
        let provider = provider(&exporter);
        let tracer = provider.tracer("test", None::<&str>);

        tracer.start("a").end();
        tracer.start("b").end();
        provider.shutdown().await;
        provider.shutdown().await;

        assert_eq!(exporter.finished_spans().len(), 2);
        assert!(exporter.is_shut_down());

        tracer.start("late").end();
        assert_eq!(provider.dropped_spans(), 1);
    }

    #[tokio::test]
    async fn noop_provider_discards() {
        let provider = TracerProvider::noop();
        let span = provider.tracer("test", None::<&str>).start("x");
        assert!(!span.is_recording());
        assert!(span.span_context().is_valid());
        span.end();
        provider.force_flush().await;
        assert_eq!(provider.dropped_spans(), 0);
    }
}
