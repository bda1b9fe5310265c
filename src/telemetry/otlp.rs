//! OTLP/JSON encoding of finished spans.
//!
//! Mirrors `ExportTraceServiceRequest` from the OTLP protobuf definitions
//! using the proto3 JSON mapping: camelCase keys, hex-encoded ids and 64-bit
//! integers rendered as strings.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::telemetry::span::{
    AttributeValue, InstrumentationScope, KeyValue, Resource, SpanData, SpanKind, SpanStatus,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTraceServiceRequest {
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    pub resource: OtlpResource,
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Serialize)]
pub struct OtlpResource {
    pub attributes: Vec<OtlpKeyValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpans {
    pub scope: OtlpScope,
    pub spans: Vec<OtlpSpan>,
}

#[derive(Debug, Serialize)]
pub struct OtlpScope {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtlpSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trace_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub flags: u32,
    pub name: String,
    pub kind: u8,
    pub start_time_unix_nano: String,
    pub end_time_unix_nano: String,
    pub attributes: Vec<OtlpKeyValue>,
    pub status: OtlpStatus,
}

#[derive(Debug, Serialize)]
pub struct OtlpKeyValue {
    pub key: String,
    pub value: AnyValue,
}

#[derive(Debug, Serialize)]
pub enum AnyValue {
    #[serde(rename = "stringValue")]
    String(String),
    #[serde(rename = "boolValue")]
    Bool(bool),
    #[serde(rename = "intValue")]
    Int(String),
    #[serde(rename = "doubleValue")]
    Double(f64),
}

#[derive(Debug, Serialize)]
pub struct OtlpStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub code: u8,
}

/// Groups `spans` by resource and instrumentation scope.
pub fn encode(spans: Vec<SpanData>) -> ExportTraceServiceRequest {
    let mut groups: Vec<(Arc<Resource>, Vec<(InstrumentationScope, Vec<OtlpSpan>)>)> = Vec::new();

    for span in spans {
        let resource_idx = match groups.iter().position(|(r, _)| Arc::ptr_eq(r, &span.resource)) {
            Some(i) => i,
            None => {
                groups.push((Arc::clone(&span.resource), Vec::new()));
                groups.len() - 1
            }
        };
        let scopes = &mut groups[resource_idx].1;
        let scope_idx = match scopes.iter().position(|(s, _)| *s == span.scope) {
            Some(i) => i,
            None => {
                scopes.push((span.scope.clone(), Vec::new()));
                scopes.len() - 1
            }
        };
        scopes[scope_idx].1.push(encode_span(span));
    }

    ExportTraceServiceRequest {
        resource_spans: groups
            .into_iter()
            .map(|(resource, scopes)| ResourceSpans {
                resource: OtlpResource { attributes: encode_attributes(resource.attributes()) },
                scope_spans: scopes
                    .into_iter()
                    .map(|(scope, spans)| ScopeSpans {
                        scope: OtlpScope {
                            name: scope.name.into_owned(),
                            version: scope.version.map(|v| v.into_owned()),
                        },
                        spans,
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn encode_span(span: SpanData) -> OtlpSpan {
    let cx = &span.span_context;
    let (code, message) = match span.status {
        SpanStatus::Unset => (0, String::new()),
        SpanStatus::Ok => (1, String::new()),
        SpanStatus::Error { description } => (2, description.into_owned()),
    };
    OtlpSpan {
        trace_id: cx.trace_id().to_string(),
        span_id: cx.span_id().to_string(),
        trace_state: cx.trace_state().as_str().to_owned(),
        parent_span_id: span.parent_span_id.map(|id| id.to_string()),
        flags: u32::from(cx.trace_flags().bits()),
        name: span.name.into_owned(),
        kind: match span.kind {
            SpanKind::Internal => 1,
            SpanKind::Server => 2,
            SpanKind::Client => 3,
            SpanKind::Producer => 4,
            SpanKind::Consumer => 5,
        },
        start_time_unix_nano: unix_nanos(span.start_time),
        end_time_unix_nano: unix_nanos(span.end_time),
        attributes: encode_attributes(&span.attributes),
        status: OtlpStatus { message, code },
    }
}

fn encode_attributes(attributes: &[KeyValue]) -> Vec<OtlpKeyValue> {
    attributes
        .iter()
        .map(|kv| OtlpKeyValue {
            key: kv.key.to_string(),
            value: match &kv.value {
                AttributeValue::String(s) => AnyValue::String(s.to_string()),
                AttributeValue::Bool(b) => AnyValue::Bool(*b),
                AttributeValue::I64(i) => AnyValue::Int(i.to_string()),
                AttributeValue::F64(f) => AnyValue::Double(*f),
            },
        })
        .collect()
}

fn unix_nanos(t: SystemTime) -> String {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0).to_string()
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::telemetry::context::{SpanContext, TraceState};
    use crate::telemetry::id::{SpanId, TraceFlags, TraceId};

    fn span(resource: &Arc<Resource>, scope: &'static str) -> SpanData {
        SpanData {
            span_context: SpanContext::new(
                TraceId::from_bytes([0xab; 16]),
                SpanId::from_bytes([0xcd; 8]),
                TraceFlags::SAMPLED,
                false,
                TraceState::default(),
            ),
            parent_span_id: Some(SpanId::from_bytes([0x01; 8])),
            name: Cow::Borrowed("/"),
            kind: SpanKind::Server,
            start_time: UNIX_EPOCH + Duration::from_nanos(1_000),
            end_time: UNIX_EPOCH + Duration::from_nanos(2_500),
            attributes: vec![
                KeyValue::new("http.method", "GET"),
                KeyValue::new("http.status_code", 200i64),
            ],
            status: SpanStatus::Unset,
            scope: InstrumentationScope { name: Cow::Borrowed(scope), version: Some(Cow::Borrowed("1.0")) },
            resource: Arc::clone(resource),
        }
    }

    #[test]
    fn span_uses_proto3_json_mapping() {
        let resource = Arc::new(Resource::new([KeyValue::new("service.name", "lower")]));
        let body = serde_json::to_value(encode(vec![span(&resource, "lower.http")])).unwrap();

        assert_eq!(
            body,
            json!({
                "resourceSpans": [{
                    "resource": {
                        "attributes": [{ "key": "service.name", "value": { "stringValue": "lower" } }]
                    },
                    "scopeSpans": [{
                        "scope": { "name": "lower.http", "version": "1.0" },
                        "spans": [{
                            "traceId": "abababababababababababababababab",
                            "spanId": "cdcdcdcdcdcdcdcd",
                            "parentSpanId": "0101010101010101",
                            "flags": 1,
                            "name": "/",
                            "kind": 2,
                            "startTimeUnixNano": "1000",
                            "endTimeUnixNano": "2500",
                            "attributes": [
                                { "key": "http.method", "value": { "stringValue": "GET" } },
                                { "key": "http.status_code", "value": { "intValue": "200" } }
                            ],
                            "status": { "code": 0 }
                        }]
                    }]
                }]
            })
        );
    }

    #[test]
    fn groups_by_scope() {
        let resource = Arc::new(Resource::default());
        let req = encode(vec![span(&resource, "a"), span(&resource, "b"), span(&resource, "a")]);
        assert_eq!(req.resource_spans.len(), 1);
        let scopes = &req.resource_spans[0].scope_spans;
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0].spans.len(), 2);
        assert_eq!(scopes[1].spans.len(), 1);
    }
}
