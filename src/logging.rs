use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::StoreConfig;

const LOG_FILE_PREFIX: &str = "fireledger.log";

/// Install the global subscriber: stderr plus, when `log_dir` is configured,
/// a daily-rolling JSON file sink.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the lifetime of the process. Calling this twice is harmless; the second
/// installation is ignored.
pub fn init(config: &StoreConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new("fireledger=info,sqlx=warn"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // stdout is reserved for command output.
    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if installed.is_ok() {
        tracing::debug!(
            target: "fireledger",
            event = "logging_initialized",
            file_sink = config.log_dir.is_some()
        );
    }
    guard
}
