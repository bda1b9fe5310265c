//! A small, self-contained tracing SDK.
//!
//! Just enough of the OpenTelemetry model to trace an HTTP server: ids,
//! W3C propagation, an ambient per-task [`Context`], spans with attributes,
//! and a non-blocking export pipeline.
//!
//! ```text
//! headers ──propagator──▶ Context ──Tracer──▶ Span ──end──▶ queue ──▶ SpanExporter
//! ```

mod baggage;
mod context;
mod exporter;
mod id;
mod otlp;
mod propagation;
mod provider;
mod span;

pub mod global;

pub use baggage::{Baggage, BaggageEntry};
pub use context::{Context, SpanContext, TraceState};
pub use exporter::{ConsoleExporter, ExportError, ExportFuture, InMemoryExporter, OtlpHttpExporter, SpanExporter};
pub use id::{SpanId, TraceFlags, TraceId};
pub use propagation::{
    BaggagePropagator, CompositePropagator, Extractor, Injector, TextMapPropagator,
    TraceContextPropagator,
};
pub use provider::{SpanBuilder, Tracer, TracerProvider, TracerProviderBuilder, DEFAULT_QUEUE_CAPACITY};
pub use span::{
    attribute, AttributeValue, InstrumentationScope, KeyValue, Resource, Span, SpanData, SpanKind,
    SpanStatus,
};
