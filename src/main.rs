//! `lower`: serves `GET /` on port 5000 and exports a span per request.
//!
//! Run with:
//!   RUST_LOG=info OTEL_TRACES_EXPORTER=console cargo run
//!
//! Try:
//!   curl http://localhost:5000/
//!   curl -H 'traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01' \
//!        http://localhost:5000/

use std::process::ExitCode;

use lower::config::TracesExporter;
use lower::middleware::trace::TracingMiddleware;
use lower::telemetry::{global, ConsoleExporter, OtlpHttpExporter, Resource, TracerProvider};
use lower::{letters, Config, Error, Method, Router, Server};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Error> {
    let config = Config::from_env()?;

    global::set_tracer_provider(tracer_provider(&config)?);
    global::set_text_map_propagator(config.propagator());

    let app = Router::new()
        .on(Method::GET, "/", letters::random_letter)
        .layer(TracingMiddleware::from_global());

    let served = Server::bind(config.bind).serve(app).await;

    // Spans of the last requests are still queued; flush them even when the
    // server failed.
    global::shutdown_tracer_provider().await;
    served
}

fn tracer_provider(config: &Config) -> Result<TracerProvider, Error> {
    let builder = TracerProvider::builder().with_resource(Resource::for_service(config.service_name.clone()));

    let provider = match config.traces_exporter {
        TracesExporter::Otlp => {
            if !config.otlp_protocol.is_supported() {
                warn!(protocol = ?config.otlp_protocol, "only http/json is supported, exporting OTLP as JSON");
            }
            let exporter = OtlpHttpExporter::new(&config.otlp_endpoint)?;
            debug!("Using OTLP endpoint: {}", exporter.uri());
            builder.with_exporter(exporter).build()
        }
        TracesExporter::Console => builder.with_exporter(ConsoleExporter).build(),
        TracesExporter::None => {
            info!("span export disabled");
            TracerProvider::noop()
        }
    };
    Ok(provider)
}
