//! Structured logging initialisation for the wavelet node.
//!
//! Two output formats are supported:
//! - [`LogFormat::Human`]: readable lines for development.
//! - [`LogFormat::Json`]: newline-delimited JSON for log aggregation.
//!
//! The filter level can be overridden at runtime via the `RUST_LOG`
//! environment variable.  When `RUST_LOG` is not set, the caller-supplied
//! `level` string is used (e.g. `"info"`, `"debug,wavelet_network=trace"`).

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::NodeError;

/// Selects the output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(NodeError::Config(format!("unknown log format {other:?}"))),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber has already been set.
pub fn init_logging(format: LogFormat, level: &str) -> Result<(), NodeError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        LogFormat::Human => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
    };
    result.map_err(|e| NodeError::Config(format!("logging already initialised: {e}")))
}
