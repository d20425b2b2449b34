//! `tracing` setup: console output plus an optional rolling file sink.
//! Simplified for a one-shot CLI invocation rather than a long-running
//! daemon: no log pruning loop, since there's no background process to
//! run it in.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::{LogRotation, LoggingArgs};

pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init(args: &LoggingArgs) -> anyhow::Result<LoggingGuard> {
    let filter = build_filter(args)?;

    use std::io::IsTerminal as _;
    let console_ansi = std::io::stderr().is_terminal();
    let console_layer = tracing_subscriber::fmt::layer().with_ansi(console_ansi).with_writer(std::io::stderr);

    let mut file_guard = None;
    let mut file_layer = None;

    if let Some(log_file) = args.log_file.as_deref() {
        let directory = log_file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let prefix = log_file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "proxsave.log".to_string());
        std::fs::create_dir_all(directory)?;

        let rotation = match args.log_rotation {
            LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
            LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
            LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        };
        let appender = tracing_appender::rolling::RollingFileAppender::new(rotation, directory, &prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        file_layer = Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking));
    }

    tracing_subscriber::registry().with(filter).with(console_layer).with(file_layer).init();

    Ok(LoggingGuard { _file_guard: file_guard })
}

fn build_filter(args: &LoggingArgs) -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let filter_str = if let Some(filter) = args.log.as_deref() {
        filter.to_string()
    } else if let Ok(filter) = std::env::var("RUST_LOG") {
        filter
    } else {
        "info".to_string()
    };
    Ok(tracing_subscriber::EnvFilter::try_new(filter_str)?)
}
