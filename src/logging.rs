// Logging setup: a console layer for the operator and a plain-text file
// layer (`uploads.log` in the log folder) that keeps the full history of
// every run.

use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::{Result, UploadError};

pub const LOG_FILE: &str = "uploads.log";

/// Filter used when `RUST_LOG` is not set.
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "info,upload_to_platform=debug"
    } else {
        "info"
    }
}

/// Install the global subscriber. The returned guard flushes the file
/// writer when dropped, so `main` must hold it for the whole run.
///
/// `RUST_LOG` overrides the default filter.
pub fn init(log_folder: &Path, verbose: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(log_folder).map_err(|e| UploadError::io(log_folder, e))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_folder, LOG_FILE));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    // The progress bar owns the console during a run; keep it quiet there
    // unless asked.
    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(console_level),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .map_err(|e| UploadError::Configuration(format!("failed to install logger: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_only_this_crate_to_debug() {
        assert_eq!(default_directives(false), "info");
        assert_eq!(default_directives(true), "info,upload_to_platform=debug");
        assert!(EnvFilter::try_new(default_directives(true)).is_ok());
    }
}
