//! Tracing/logging initialization.
//!
//! Human-readable logs go to stdout. With `LOG_DIR` set, JSON logs are also
//! written to a daily rolling file; the returned guard must live until
//! shutdown so buffered lines are flushed.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Config;

pub fn init(config: &Config) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    let stdout = fmt::layer().with_target(false);

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "house_app.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Safe to call more than once; later calls are no-ops.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init();

    guard
}
