//! Encoding and decoding [`Context`] into and out of request headers.
//!
//! The propagators never fail: a missing or malformed header simply leaves
//! the context without the corresponding value, and span creation then
//! starts a new root trace.

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::telemetry::baggage::Baggage;
use crate::telemetry::context::{Context, SpanContext, TraceState};
use crate::telemetry::id::{SpanId, TraceFlags, TraceId};

const TRACEPARENT: &str = "traceparent";
const TRACESTATE: &str = "tracestate";
const BAGGAGE: &str = "baggage";

/// Read-only access to a carrier of string key/value pairs.
pub trait Extractor {
    /// Value for `key`. Lookup is case-insensitive.
    fn get(&self, key: &str) -> Option<&str>;
}

/// Write access to a carrier of string key/value pairs.
pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(value)) else {
            return;
        };
        self.insert(name, value);
    }
}

/// Plain `(name, value)` lists, as used by hand-built outbound requests.
impl Extractor for Vec<(String, String)> {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str())
    }
}

impl Injector for Vec<(String, String)> {
    fn set(&mut self, key: &str, value: String) {
        match self.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, v)) => *v = value,
            None => self.push((key.to_owned(), value)),
        }
    }
}

/// A header-based propagation format.
pub trait TextMapPropagator: Send + Sync + 'static {
    /// Decodes this format from `carrier` on top of `cx`.
    fn extract_with_context(&self, cx: &Context, carrier: &dyn Extractor) -> Context;

    /// Encodes this format's part of `cx` into `carrier`.
    fn inject_context(&self, cx: &Context, carrier: &mut dyn Injector);

    /// Header names this propagator reads and writes.
    fn fields(&self) -> &[&'static str];

    /// Decodes on top of the empty context.
    fn extract(&self, carrier: &dyn Extractor) -> Context {
        self.extract_with_context(&Context::new(), carrier)
    }

    /// Encodes the current context. Downstream code calls this before making
    /// an outbound request.
    fn inject(&self, carrier: &mut dyn Injector) {
        self.inject_context(&Context::current(), carrier);
    }
}

// ── W3C Trace Context ─────────────────────────────────────────────────────────

/// `traceparent` / `tracestate` per W3C Trace Context.
///
/// ```text
/// traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
///              ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
///         version trace-id                         parent-id        flags
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceContextPropagator;

impl TraceContextPropagator {
    pub fn new() -> Self {
        Self
    }

    /// Parses a `traceparent` value into a remote span context.
    pub fn parse_traceparent(value: &str) -> Option<SpanContext> {
        let value = value.trim();
        let mut parts = value.split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        let [version] = crate::telemetry::id::decode_hex::<1>(version)?;
        // `ff` is forbidden; version 00 has exactly four fields, while later
        // versions may append fields that this parser does not understand.
        if version == 0xff || (version == 0 && parts.next().is_some()) {
            return None;
        }
        let trace_id = TraceId::from_hex(trace_id)?;
        let span_id = SpanId::from_hex(span_id)?;
        let [flags] = crate::telemetry::id::decode_hex::<1>(flags)?;
        let flags = if version == 0 {
            // Only the sampled bit is defined for version 00.
            TraceFlags::new(flags & TraceFlags::SAMPLED.bits())
        } else {
            TraceFlags::new(flags)
        };

        Some(SpanContext::new(trace_id, span_id, flags, true, TraceState::default()))
    }

    pub fn format_traceparent(span: &SpanContext) -> String {
        format!("00-{}-{}-{}", span.trace_id(), span.span_id(), span.trace_flags())
    }
}

impl TextMapPropagator for TraceContextPropagator {
    fn extract_with_context(&self, cx: &Context, carrier: &dyn Extractor) -> Context {
        let Some(span) = carrier.get(TRACEPARENT).and_then(Self::parse_traceparent) else {
            return cx.clone();
        };
        let state = carrier.get(TRACESTATE).and_then(TraceState::from_header).unwrap_or_default();
        let span = SpanContext::new(span.trace_id(), span.span_id(), span.trace_flags(), true, state);
        cx.with_span_context(span)
    }

    fn inject_context(&self, cx: &Context, carrier: &mut dyn Injector) {
        let Some(span) = cx.span_context().filter(|s| s.is_valid()) else { return };
        carrier.set(TRACEPARENT, Self::format_traceparent(span));
        if !span.trace_state().is_empty() {
            carrier.set(TRACESTATE, span.trace_state().as_str().to_owned());
        }
    }

    fn fields(&self) -> &[&'static str] {
        &[TRACEPARENT, TRACESTATE]
    }
}

// ── W3C Baggage ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
pub struct BaggagePropagator;

impl BaggagePropagator {
    pub fn new() -> Self {
        Self
    }
}

impl TextMapPropagator for BaggagePropagator {
    fn extract_with_context(&self, cx: &Context, carrier: &dyn Extractor) -> Context {
        match carrier.get(BAGGAGE).map(Baggage::from_header) {
            Some(baggage) if !baggage.is_empty() => cx.with_baggage(baggage),
            _ => cx.clone(),
        }
    }

    fn inject_context(&self, cx: &Context, carrier: &mut dyn Injector) {
        let header = cx.baggage().to_header();
        if !header.is_empty() {
            carrier.set(BAGGAGE, header);
        }
    }

    fn fields(&self) -> &[&'static str] {
        &[BAGGAGE]
    }
}

// ── Composite ─────────────────────────────────────────────────────────────────

/// Runs several propagators in order. Extraction threads the context through
/// each one, so later formats add to what earlier ones found.
#[derive(Clone, Default)]
pub struct CompositePropagator {
    propagators: Vec<Arc<dyn TextMapPropagator>>,
    fields: Vec<&'static str>,
}

impl CompositePropagator {
    pub fn new(propagators: Vec<Arc<dyn TextMapPropagator>>) -> Self {
        let fields = propagators.iter().flat_map(|p| p.fields().iter().copied()).collect();
        Self { propagators, fields }
    }

    /// `tracecontext,baggage`, the default for `OTEL_PROPAGATORS`.
    pub fn w3c() -> Self {
        Self::new(vec![Arc::new(TraceContextPropagator), Arc::new(BaggagePropagator)])
    }

    pub fn is_empty(&self) -> bool {
        self.propagators.is_empty()
    }
}

impl std::fmt::Debug for CompositePropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositePropagator").field("fields", &self.fields).finish()
    }
}

impl TextMapPropagator for CompositePropagator {
    fn extract_with_context(&self, cx: &Context, carrier: &dyn Extractor) -> Context {
        self.propagators
            .iter()
            .fold(cx.clone(), |cx, p| p.extract_with_context(&cx, carrier))
    }

    fn inject_context(&self, cx: &Context, carrier: &mut dyn Injector) {
        for p in &self.propagators {
            p.inject_context(cx, carrier);
        }
    }

    fn fields(&self) -> &[&'static str] {
        &self.fields
    }
}
