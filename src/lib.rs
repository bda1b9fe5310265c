//! # lower
//!
//! A tiny HTTP service that answers `GET /` with one random lowercase letter,
//! and traces every request it serves.
//!
//! ## The contract
//!
//! Callers may send a W3C `traceparent` header. When they do, the server span
//! for their request joins their trace as a child of their span. When they
//! don't, or the header is malformed, the request starts a new trace. Either
//! way the response is exactly what the route produced.
//!
//! Finished spans leave the process in batches through a bounded queue and a
//! background exporter. A slow or unreachable collector never delays a
//! response; spans are dropped instead.
//!
//! - Radix-tree routing: O(path-length) lookup via [`matchit`]
//! - Async I/O: tokio + hyper, HTTP/1.1 and HTTP/2
//! - Tracing: [`middleware::trace::TracingMiddleware`] and the [`telemetry`] SDK
//! - Graceful shutdown: SIGTERM / Ctrl-C, drains in-flight requests
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lower::middleware::trace::TracingMiddleware;
//! use lower::telemetry::{global, ConsoleExporter, TracerProvider};
//! use lower::{letters, Method, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lower::Error> {
//!     global::set_tracer_provider(TracerProvider::builder().with_exporter(ConsoleExporter).build());
//!
//!     let app = Router::new()
//!         .on(Method::GET, "/", letters::random_letter)
//!         .layer(TracingMiddleware::from_global());
//!
//!     Server::bind(([0, 0, 0, 0], 5000).into()).serve(app).await?;
//!     global::shutdown_tracer_provider().await;
//!     Ok(())
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod letters;
pub mod middleware;
pub mod telemetry;

pub use config::Config;
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, Handler, IntoOutcome, Outcome};
pub use http::{Method, StatusCode};
pub use request::{Request, RequestBuilder};
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{App, Router};
pub use server::Server;
