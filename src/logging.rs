use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter directives built from config; `RUST_LOG` replaces them entirely.
fn directives(config: &AppConfig) -> String {
    let transfer_level = config
        .transfer_log_level
        .as_deref()
        .unwrap_or(config.log_level.as_str());
    // sqlx logs every statement at info
    format!(
        "{},simple_bank::transfer={},sqlx=warn",
        config.log_level, transfer_level
    )
}

/// Install the global subscriber and return the file writer guard, which
/// must outlive every log call.
///
/// Stdout belongs to the CLI's JSON results, so console logs go to stderr.
/// Each closed `transfer_tx` span is logged with its busy/idle time.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(config)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(file_writer);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(file_writer)
            .with_ansi(false);
        let console_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    }

    guard
}
