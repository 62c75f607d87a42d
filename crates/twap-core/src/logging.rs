//! Logging initialization using the `tracing` ecosystem.
//!
//! - Console output (colored, human-readable)
//! - Optional file output (daily rotation via `tracing-appender`), plain or JSON
//! - Level from `RUST_LOG` if set, otherwise the explicit parameter

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Call once at program start.
///
/// # Parameters
///
/// - `log_level`: default level if `RUST_LOG` is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: log file prefix (e.g. `"twap"`)
/// - `json`: write the file layer as JSON lines
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let registry = tracing_subscriber::registry().with(env_filter).with(console_layer);

    match log_dir {
        Some(dir) if json => {
            let file_appender = tracing_appender::rolling::daily(dir, module_name);
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_target(true)
                .with_current_span(false);
            registry.with(file_layer).init();
        }
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, module_name);
            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true);
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}
