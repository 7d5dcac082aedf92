//! Tracing subscriber setup for the `bundlelab` binary.
//!
//! Logs go to stderr so command output on stdout stays clean. `RUST_LOG`
//! overrides the configured level.

use std::io::IsTerminal;

use bundlelab_core::config::{LogConfig, LogFormat};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_LEVEL: &str = "info";

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(config: &LogConfig) -> String {
    let level = config.level.as_deref().unwrap_or(DEFAULT_LEVEL);
    format!("bundlelab_core={level},bundlelab={level}")
}

/// Install the global subscriber. Call once, before any command runs.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    match config.format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Json => {
            let layer = fmt::layer().json().with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}
