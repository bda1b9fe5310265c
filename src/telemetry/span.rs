//! Spans: the live, in-flight [`Span`] and the finished [`SpanData`] that is
//! handed to exporters.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::telemetry::context::SpanContext;
use crate::telemetry::id::SpanId;
use crate::telemetry::provider::ProviderInner;

/// HTTP semantic-convention attribute keys used by the server middleware.
pub mod attribute {
    pub const COMPONENT: &str = "component";
    pub const HTTP_METHOD: &str = "http.method";
    pub const HTTP_ROUTE: &str = "http.route";
    pub const HTTP_URL: &str = "http.url";
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// A scalar attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    String(Cow<'static, str>),
    Bool(bool),
    I64(i64),
    F64(f64),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bool(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
        }
    }
}

impl From<&'static str> for AttributeValue {
    fn from(v: &'static str) -> Self { Self::String(Cow::Borrowed(v)) }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self { Self::String(Cow::Owned(v)) }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self { Self::I64(v) }
}

impl From<u16> for AttributeValue {
    fn from(v: u16) -> Self { Self::I64(i64::from(v)) }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self { Self::F64(v) }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyValue {
    pub key: Cow<'static, str>,
    pub value: AttributeValue,
}

impl KeyValue {
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<AttributeValue>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error { description: Cow<'static, str> },
}

impl SpanStatus {
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Self::Error { description: description.into() }
    }
}

/// Name and version of the library that produced a span.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstrumentationScope {
    pub name: Cow<'static, str>,
    pub version: Option<Cow<'static, str>>,
}

/// Attributes describing the process that produced the spans.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    attributes: Vec<KeyValue>,
}

impl Resource {
    pub fn new(attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        Self { attributes: attributes.into_iter().collect() }
    }

    /// `service.name` plus the SDK identification attributes.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self::new([
            KeyValue::new("service.name", service_name.into()),
            KeyValue::new("telemetry.sdk.language", "rust"),
            KeyValue::new("telemetry.sdk.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("telemetry.sdk.version", env!("CARGO_PKG_VERSION")),
        ])
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }

    pub fn attributes(&self) -> &[KeyValue] {
        &self.attributes
    }
}

/// A finished span, as seen by exporters.
#[derive(Clone, Debug)]
pub struct SpanData {
    pub span_context: SpanContext,
    pub parent_span_id: Option<SpanId>,
    pub name: Cow<'static, str>,
    pub kind: SpanKind,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: Vec<KeyValue>,
    pub status: SpanStatus,
    pub scope: InstrumentationScope,
    pub resource: Arc<Resource>,
}

impl SpanData {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }
}

/// An in-flight span.
///
/// A `Span` ends exactly once: either through [`Span::end`] or, if it is
/// dropped first, from its `Drop` impl. Dropping during a panic marks the
/// span as errored. There is no way to end a span twice or to leak one
/// without ending it.
pub struct Span {
    span_context: SpanContext,
    data: Option<SpanData>,
    provider: Option<Arc<ProviderInner>>,
}

impl Span {
    pub(crate) fn new(data: SpanData, provider: Option<Arc<ProviderInner>>) -> Self {
        Self { span_context: data.span_context.clone(), data: Some(data), provider }
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// `false` for spans that will not be exported (unsampled, or created by
    /// a provider without an exporter). Attributes are still accepted.
    pub fn is_recording(&self) -> bool {
        self.provider.as_ref().is_some_and(|p| p.is_exporting()) && self.span_context.is_sampled()
    }

    /// Sets `key` to `value`, replacing any previous value for `key`.
    pub fn set_attribute(&mut self, key: impl Into<Cow<'static, str>>, value: impl Into<AttributeValue>) {
        let Some(data) = self.data.as_mut() else { return };
        let kv = KeyValue::new(key, value);
        match data.attributes.iter_mut().find(|existing| existing.key == kv.key) {
            Some(existing) => existing.value = kv.value,
            None => data.attributes.push(kv),
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(data) = self.data.as_mut() {
            data.status = status;
        }
    }

    /// Marks the span as failed with the error's message.
    pub fn record_error(&mut self, err: &(dyn std::error::Error + 'static)) {
        self.set_status(SpanStatus::error(err.to_string()));
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(mut data) = self.data.take() else { return };
        data.end_time = SystemTime::now();
        if let Some(provider) = &self.provider {
            provider.on_end(data);
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Some(data) = self.data.as_mut() {
                if data.status == SpanStatus::Unset {
                    data.status = SpanStatus::error("panicked");
                }
            }
        }
        self.finish();
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("span_context", &self.span_context)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}
