//! Process-wide tracer provider and propagator.
//!
//! Installed once by `main` before the server starts, read by every request,
//! and flushed by [`shutdown_tracer_provider`] after the server has drained.
//! Library code and tests can bypass the globals entirely by passing a
//! [`Tracer`] to the middleware directly.

use std::borrow::Cow;
use std::sync::{Arc, RwLock};

use crate::telemetry::propagation::{CompositePropagator, TextMapPropagator};
use crate::telemetry::provider::{Tracer, TracerProvider};

static PROVIDER: RwLock<Option<TracerProvider>> = RwLock::new(None);
static PROPAGATOR: RwLock<Option<Arc<dyn TextMapPropagator>>> = RwLock::new(None);

/// Installs `provider` and returns the previous one, if any.
pub fn set_tracer_provider(provider: TracerProvider) -> Option<TracerProvider> {
    let mut slot = PROVIDER.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.replace(provider)
}

/// The installed provider, or a no-op provider when none is installed.
pub fn tracer_provider() -> TracerProvider {
    PROVIDER
        .read()
        .ok()
        .and_then(|slot| slot.clone())
        .unwrap_or_else(TracerProvider::noop)
}

/// Shorthand for `tracer_provider().tracer(name, version)`.
pub fn tracer(
    name: impl Into<Cow<'static, str>>,
    version: Option<impl Into<Cow<'static, str>>>,
) -> Tracer {
    tracer_provider().tracer(name, version)
}

/// Removes the installed provider and flushes it.
pub async fn shutdown_tracer_provider() {
    let provider = PROVIDER.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    if let Some(provider) = provider {
        provider.shutdown().await;
    }
}

pub fn set_text_map_propagator(propagator: impl TextMapPropagator) {
    let mut slot = PROPAGATOR.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(Arc::new(propagator));
}

/// The installed propagator, defaulting to W3C trace context plus baggage.
pub fn text_map_propagator() -> Arc<dyn TextMapPropagator> {
    PROPAGATOR
        .read()
        .ok()
        .and_then(|slot| slot.clone())
        .unwrap_or_else(|| Arc::new(CompositePropagator::w3c()))
}
