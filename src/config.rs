//! Environment configuration.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `OTEL_SERVICE_NAME` | `lower` | `service.name` on every exported span |
//! | `OTEL_TRACES_EXPORTER` | `otlp` | `otlp`, `console` or `none` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://collector:4318` | collector base URL |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `http/json` | only `http/json` is spoken |
//! | `OTEL_PROPAGATORS` | `tracecontext,baggage` | header formats read and written |
//!
//! The bind address is fixed at `0.0.0.0:5000`.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use crate::telemetry::{BaggagePropagator, CompositePropagator, TextMapPropagator, TraceContextPropagator};

pub const DEFAULT_SERVICE_NAME: &str = "lower";
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://collector:4318";
pub const BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 5000);

/// Where finished spans go.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TracesExporter {
    Otlp,
    Console,
    None,
}

impl FromStr for TracesExporter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "otlp" => Ok(Self::Otlp),
            "console" | "logging" => Ok(Self::Console),
            "none" => Ok(Self::None),
            other => Err(ConfigError::UnknownExporter(other.to_owned())),
        }
    }
}

/// Wire protocol requested for OTLP.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OtlpProtocol {
    HttpJson,
    HttpProtobuf,
    Grpc,
}

impl OtlpProtocol {
    /// Only OTLP/HTTP with JSON bodies is implemented. Spans are sent as
    /// JSON whatever was requested.
    pub fn is_supported(self) -> bool {
        self == Self::HttpJson
    }
}

impl FromStr for OtlpProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "http/json" => Ok(Self::HttpJson),
            "http/protobuf" => Ok(Self::HttpProtobuf),
            "grpc" => Ok(Self::Grpc),
            other => Err(ConfigError::UnknownProtocol(other.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Propagator {
    TraceContext,
    Baggage,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub service_name: String,
    pub traces_exporter: TracesExporter,
    pub otlp_endpoint: String,
    pub otlp_protocol: OtlpProtocol,
    pub propagators: Vec<Propagator>,
    pub bind: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            traces_exporter: TracesExporter::Otlp,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_owned(),
            otlp_protocol: OtlpProtocol::HttpJson,
            propagators: vec![Propagator::TraceContext, Propagator::Baggage],
            bind: SocketAddr::from(BIND_ADDR),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            service_name: get("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            traces_exporter: get("OTEL_TRACES_EXPORTER")
                .map(|v| v.parse::<TracesExporter>())
                .transpose()?
                .unwrap_or(defaults.traces_exporter),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            otlp_protocol: get("OTEL_EXPORTER_OTLP_PROTOCOL")
                .map(|v| v.parse::<OtlpProtocol>())
                .transpose()?
                .unwrap_or(defaults.otlp_protocol),
            propagators: match get("OTEL_PROPAGATORS") {
                Some(list) => parse_propagators(&list)?,
                None => defaults.propagators,
            },
            bind: defaults.bind,
        })
    }

    /// Builds the configured propagator stack.
    pub fn propagator(&self) -> CompositePropagator {
        CompositePropagator::new(
            self.propagators
                .iter()
                .map(|p| -> Arc<dyn TextMapPropagator> {
                    match p {
                        Propagator::TraceContext => Arc::new(TraceContextPropagator),
                        Propagator::Baggage => Arc::new(BaggagePropagator),
                    }
                })
                .collect(),
        )
    }
}

fn parse_propagators(list: &str) -> Result<Vec<Propagator>, ConfigError> {
    let names: Vec<String> =
        list.split(',').map(str::trim).filter(|n| !n.is_empty()).map(str::to_ascii_lowercase).collect();

    // `none` disables propagation and must stand alone.
    if names.iter().any(|n| n == "none") {
        if names.iter().all(|n| n == "none") {
            return Ok(Vec::new());
        }
        return Err(ConfigError::NoneWithOthers(list.trim().to_owned()));
    }

    let mut out = Vec::new();
    for name in names {
        let p = match name.as_str() {
            "tracecontext" => Propagator::TraceContext,
            "baggage" => Propagator::Baggage,
            _ => return Err(ConfigError::UnknownPropagator(name)),
        };
        if !out.contains(&p) {
            out.push(p);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConfigError {
    UnknownExporter(String),
    UnknownProtocol(String),
    UnknownPropagator(String),
    NoneWithOthers(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownExporter(v) => write!(f, "OTEL_TRACES_EXPORTER: unknown exporter `{v}`"),
            Self::UnknownProtocol(v) => write!(f, "OTEL_EXPORTER_OTLP_PROTOCOL: unknown protocol `{v}`"),
            Self::UnknownPropagator(v) => write!(f, "OTEL_PROPAGATORS: unknown propagator `{v}`"),
            Self::NoneWithOthers(v) => write!(f, "OTEL_PROPAGATORS: `none` cannot be combined with other propagators in `{v}`"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.otlp_endpoint, "http://collector:4318");
        assert_eq!(cfg.traces_exporter, TracesExporter::Otlp);
        assert_eq!(cfg.bind.to_string(), "0.0.0.0:5000");
    }

    #[test]
    fn empty_values_count_as_unset() {
        let cfg = config(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "  "), ("OTEL_SERVICE_NAME", "")]).unwrap();
        assert_eq!(cfg.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(cfg.service_name, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("OTEL_SERVICE_NAME", "lower-eu"),
            ("OTEL_TRACES_EXPORTER", "Console"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4318"),
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
            ("OTEL_PROPAGATORS", "baggage, tracecontext,baggage"),
        ])
        .unwrap();
        assert_eq!(cfg.service_name, "lower-eu");
        assert_eq!(cfg.traces_exporter, TracesExporter::Console);
        assert_eq!(cfg.otlp_endpoint, "http://localhost:4318");
        assert!(!cfg.otlp_protocol.is_supported());
        assert_eq!(cfg.propagators, vec![Propagator::Baggage, Propagator::TraceContext]);
        assert_eq!(cfg.propagator().fields(), ["baggage", "traceparent", "tracestate"]);
    }

    #[test]
    fn none_propagator_disables_propagation() {
        let cfg = config(&[("OTEL_PROPAGATORS", "none")]).unwrap();
        assert!(cfg.propagator().is_empty());
    }

    #[test]
    fn none_mixed_with_other_propagators_is_an_error() {
        for list in ["tracecontext,none", "none, baggage", "None,tracecontext,baggage"] {
            assert!(
                matches!(config(&[("OTEL_PROPAGATORS", list)]), Err(ConfigError::NoneWithOthers(_))),
                "{list} was accepted"
            );
        }
        assert!(config(&[("OTEL_PROPAGATORS", "none,none")]).unwrap().propagators.is_empty());
    }

    #[test]
    fn unknown_names_are_errors() {
        assert_eq!(
            config(&[("OTEL_TRACES_EXPORTER", "zipkin")]),
            Err(ConfigError::UnknownExporter("zipkin".into()))
        );
        assert!(matches!(
            config(&[("OTEL_EXPORTER_OTLP_PROTOCOL", "carrier-pigeon")]),
            Err(ConfigError::UnknownProtocol(_))
        ));
        assert!(matches!(config(&[("OTEL_PROPAGATORS", "b3")]), Err(ConfigError::UnknownPropagator(_))));
    }
}
