//! Unified error type.

use std::fmt;

use crate::config::ConfigError;
use crate::telemetry::ExportError;

/// A type-erased failure raised by a handler or middleware.
///
/// Handlers return this through `Result<_, E: Into<BoxError>>`. The server
/// turns it into `500 Internal Server Error` once it has travelled back up
/// through every middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by lower's fallible startup operations.
///
/// Application-level errors (404, 500, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures such as bad configuration, an unusable collector
/// endpoint or a port that cannot be bound.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Config(ConfigError),
    Telemetry(ExportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Telemetry(e) => write!(f, "telemetry: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Telemetry(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ExportError> for Error {
    fn from(e: ExportError) -> Self {
        Self::Telemetry(e)
    }
}
