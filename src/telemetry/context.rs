//! Span context and the ambient, per-task [`Context`].
//!
//! # Why a task-local
//!
//! Many requests run concurrently on the same worker threads, and each one
//! suspends at every `.await`. A process-wide "current context" would be
//! overwritten by whichever request polled last. A thread-local has the same
//! problem, since tokio moves tasks between threads.
//!
//! `tokio::task_local!` binds the value to the *future* being polled instead.
//! [`Context::scope`] installs a context for exactly the lifetime of one
//! future; the value is restored when that future completes, is dropped, or
//! panics. Nested scopes shadow outer ones.

use std::future::Future;

use crate::telemetry::baggage::Baggage;
use crate::telemetry::id::{SpanId, TraceFlags, TraceId};

tokio::task_local! {
    static CURRENT: Context;
}

/// The opaque `tracestate` header value, forwarded verbatim.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TraceState(String);

impl TraceState {
    /// W3C caps `tracestate` at 32 list members.
    const MAX_MEMBERS: usize = 32;

    /// Accepts a raw header value. Returns `None` for values that are empty
    /// or carry more list members than the format allows.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let members = value.split(',').filter(|m| !m.trim().is_empty()).count();
        if members == 0 || members > Self::MAX_MEMBERS {
            return None;
        }
        Some(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The identity of one span, as carried across process boundaries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    trace_flags: TraceFlags,
    trace_state: TraceState,
    is_remote: bool,
}

impl SpanContext {
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: TraceFlags,
        is_remote: bool,
        trace_state: TraceState,
    ) -> Self {
        Self { trace_id, span_id, trace_flags, trace_state, is_remote }
    }

    pub fn trace_id(&self) -> TraceId { self.trace_id }
    pub fn span_id(&self) -> SpanId { self.span_id }
    pub fn trace_flags(&self) -> TraceFlags { self.trace_flags }
    pub fn trace_state(&self) -> &TraceState { &self.trace_state }
    pub fn is_remote(&self) -> bool { self.is_remote }
    pub fn is_sampled(&self) -> bool { self.trace_flags.is_sampled() }

    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }
}

/// An immutable bundle of propagated values: the active span (if any) and
/// the request's baggage.
///
/// `with_*` methods return a new `Context`; nothing is ever mutated in place,
/// so a context can be shared freely between the middleware and the tasks it
/// scopes.
#[derive(Clone, Debug, Default)]
pub struct Context {
    span: Option<SpanContext>,
    baggage: Baggage,
}

impl Context {
    /// The empty context: no parent span, no baggage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The context installed by the innermost enclosing [`Context::scope`],
    /// or the empty context outside any scope.
    pub fn current() -> Self {
        CURRENT.try_with(Clone::clone).unwrap_or_default()
    }

    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn has_active_span(&self) -> bool {
        self.span.as_ref().is_some_and(SpanContext::is_valid)
    }

    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    pub fn with_span_context(&self, span: SpanContext) -> Self {
        Self { span: Some(span), baggage: self.baggage.clone() }
    }

    pub fn with_baggage(&self, baggage: Baggage) -> Self {
        Self { span: self.span.clone(), baggage }
    }

    /// Runs `fut` with `self` as the current context.
    ///
    /// The binding lives inside the returned future, so it follows the
    /// future across `.await` points and worker threads and disappears with
    /// it on every exit path.
    pub fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        CURRENT.scope(self, fut)
    }

    /// Synchronous counterpart of [`scope`](Context::scope).
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_ctx(trace: u8, span: u8) -> SpanContext {
        SpanContext::new(
            TraceId::from_bytes([trace; 16]),
            SpanId::from_bytes([span; 8]),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        )
    }

    #[test]
    fn current_outside_scope_is_empty() {
        assert!(!Context::current().has_active_span());
    }

    #[test]
    fn sync_scope_installs_and_restores() {
        let cx = Context::new().with_span_context(span_ctx(1, 2));
        let seen = cx.sync_scope(|| Context::current().span_context().cloned());
        assert_eq!(seen, Some(span_ctx(1, 2)));
        assert!(Context::current().span_context().is_none());
    }

    #[tokio::test]
    async fn nested_scopes_shadow_outer() {
        let outer = Context::new().with_span_context(span_ctx(1, 1));
        let inner = Context::new().with_span_context(span_ctx(1, 2));

        outer
            .scope(async move {
                assert_eq!(Context::current().span_context().map(|s| s.span_id()), Some(SpanId::from_bytes([1; 8])));
                inner
                    .scope(async {
                        tokio::task::yield_now().await;
                        assert_eq!(Context::current().span_context().map(|s| s.span_id()), Some(SpanId::from_bytes([2; 8])));
                    })
                    .await;
                assert_eq!(Context::current().span_context().map(|s| s.span_id()), Some(SpanId::from_bytes([1; 8])));
            })
            .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scopes_do_not_leak() {
        let mut tasks = tokio::task::JoinSet::new();
        for i in 1..=50u8 {
            tasks.spawn(async move {
                let cx = Context::new().with_span_context(span_ctx(i, i));
                cx.scope(async move {
                    for _ in 0..5 {
                        tokio::task::yield_now().await;
                        let current = Context::current();
                        assert_eq!(current.span_context().map(|s| s.trace_id()), Some(TraceId::from_bytes([i; 16])));
                    }
                })
                .await;
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }
    }

    #[test]
    fn trace_state_limits() {
        assert!(TraceState::from_header("").is_none());
        assert_eq!(TraceState::from_header(" congo=t61rcWkgMzE ").unwrap().as_str(), "congo=t61rcWkgMzE");
        let too_many = (0..33).map(|i| format!("k{i}=v")).collect::<Vec<_>>().join(",");
        assert!(TraceState::from_header(&too_many).is_none());
    }
}
