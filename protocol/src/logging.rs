//! # Structured Logging
//!
//! Installs the global `tracing` subscriber for processes embedding the
//! custody protocol (a vault daemon, a custodian agent). Format is JSON or
//! pretty-printed; filtering follows `RUST_LOG`.
//!
//! Output goes to stderr so stdout stays free for whatever the host binary
//! prints. The library itself only emits events and never installs a
//! subscriber on its own.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output for local runs.
    #[default]
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Parse a format string. Accepts "json" or "pretty" (case-insensitive).
    /// Returns `Pretty` for any unrecognized value.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber, failing if one is already set.
///
/// `default_level` applies when `RUST_LOG` is unset, e.g. `"info"` or
/// `"custody_protocol=debug"`.
pub fn try_init_logging(default_level: &str, format: LogFormat) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .try_init()?,
    }

    tracing::info!(?format, "logging initialized");
    Ok(())
}

/// Like [`try_init_logging`], but a second call is a no-op instead of an
/// error. Convenient in tests, where every test may try to set it up.
pub fn init_logging(default_level: &str, format: LogFormat) {
    if try_init_logging(default_level, format).is_err() {
        tracing::debug!("subscriber already installed");
    }
}
