//! Global `tracing` subscriber for the binary and for tests.

use std::io::IsTerminal;
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("invalid log filter '{0}': {1}")]
    Filter(String, String),
    #[error("cannot install the tracing subscriber: {0}")]
    Install(String),
}

/// Installs an `EnvFilter` + fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_directive` (e.g. `"info"` or
/// `"rustygan=debug"`). May be called once per process.
pub fn init_tracing(default_directive: &str) -> Result<(), LoggingError> {
    INITIALISED.set(()).map_err(|_| LoggingError::AlreadyInitialised)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| LoggingError::Filter(default_directive.to_string(), e.to_string()))?,
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}
