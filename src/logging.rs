//! Logging bootstrap.
//!
//! stdout carries the IPC protocol, so log records go to stderr, or to a
//! rotating file when a log directory is configured. Initialization never
//! panics; on failure the process keeps running without a logger.

use crate::config::Config;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;

const LOG_FILE_BASENAME: &str = "gradebookd";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

/// The returned handle must stay alive for as long as records should be written.
pub fn init_logging(config: &Config) -> Result<LoggerHandle, String> {
    let logger = Logger::try_with_str(&config.log_level)
        .map_err(|e| format!("invalid log level `{}`: {e}", config.log_level))?;

    let logger = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                format!("failed to create log directory `{}`: {e}", dir.display())
            })?;
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
        }
        None => logger.log_to_stderr(),
    };

    let handle = logger
        .start()
        .map_err(|e| format!("failed to start logger: {e}"))?;

    info!(
        "event=app_start version={} platform={} level={}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        config.log_level
    );
    Ok(handle)
}
