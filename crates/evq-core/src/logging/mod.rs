//! Log output for the evq binary and embedding hosts.
//!
//! Everything is written to stderr; stdout is reserved for command output.
//! Human format is the `tracing-subscriber` compact formatter, JSONL is its
//! built-in JSON formatter with one event per line.
//!
//! ```ignore
//! use evq_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::from_env(None, None))?;
//! tracing::info!(target: "evq::upload", batches = 3, "upload cycle finished");
//! ```

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set (e.g. by the host), in which
/// case evq logs flow to that subscriber instead.
pub fn init_logging(config: &LogConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(format!("evq={}", config.level)));

    match config.format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(true)
                .compact();
            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        }
    }
}
