//! Tracing setup: stderr console output plus an optional JSON log file.

use corvid_config::LoggingSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const CRATES: &[&str] = &[
    "corvid",
    "corvid_agent",
    "corvid_config",
    "corvid_guard",
    "corvid_llm",
    "corvid_pipeline",
];

/// `RUST_LOG` wins; otherwise `-v` raises our crates to debug.
fn console_filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if verbose {
        let directives: Vec<String> = CRATES.iter().map(|c| format!("{c}=debug")).collect();
        EnvFilter::new(format!("{},info", directives.join(",")))
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn file_filter() -> EnvFilter {
    let directives: Vec<String> = CRATES.iter().map(|c| format!("{c}=debug")).collect();
    EnvFilter::new(format!("{},info", directives.join(",")))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(settings: &LoggingSettings, verbose: bool) -> Option<WorkerGuard> {
    let human = (!settings.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(console_filter(&settings.level, verbose))
    });
    let json = settings.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter(&settings.level, verbose))
    });

    let (file, guard) = match &settings.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "corvid.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(file_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(human)
        .with(json)
        .with(file)
        .init();

    guard
}
