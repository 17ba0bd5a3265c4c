//! Tracing subscriber setup for the command line tool.

use crate::config::ApplicationConfig;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. `verbose` raises the
/// configured level to `debug`.
pub fn init(app: &ApplicationConfig, verbose: bool) {
    let level = if verbose { "debug" } else { app.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if app.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
