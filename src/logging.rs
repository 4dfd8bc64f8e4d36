//! Process logging.
//!
//! Stdout carries IPC responses, so log lines go to stderr unless
//! `ROLLBOOKD_LOG_DIR` names a directory for size-rotated files. Events are
//! `key=value` lines and carry ids and counts, never names or phone numbers.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

pub const LEVEL_ENV: &str = "ROLLBOOKD_LOG";
pub const DIR_ENV: &str = "ROLLBOOKD_LOG_DIR";
pub const DEFAULT_LEVEL: &str = "info";

const LOG_FILE_BASENAME: &str = "rollbookd";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;
const MAX_LOG_FILES: usize = 3;

static LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    log_dir: Option<PathBuf>,
    _handle: LoggerHandle,
}

pub fn init_from_env() -> Result<(), String> {
    let level = std::env::var(LEVEL_ENV).unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
    let level = normalize_level(&level).unwrap_or(DEFAULT_LEVEL);
    let dir = std::env::var(DIR_ENV)
        .ok()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .map(PathBuf::from);
    init_logging(level, dir.as_deref())
}

pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<(), String> {
    let level = normalize_level(level)?;
    if let Some(active) = LOGGER.get() {
        return check_same(active, level, log_dir);
    }

    let active = LOGGER.get_or_try_init(|| -> Result<ActiveLogger, String> {
        let logger = Logger::try_with_str(level)
            .map_err(|err| format!("invalid log level `{level}`: {err}"))?;
        let handle = match log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|err| {
                    format!("failed to create log directory `{}`: {err}", dir.display())
                })?;
                logger
                    .log_to_file(
                        FileSpec::default()
                            .directory(dir)
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
                    .start()
            }
            None => logger
                .log_to_stderr()
                .format_for_stderr(flexi_logger::detailed_format)
                .start(),
        }
        .map_err(|err| format!("failed to start logger: {err}"))?;

        info!(
            "event=daemon_start module=logging status=ok version={} level={} sink={}",
            env!("CARGO_PKG_VERSION"),
            level,
            log_dir
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "stderr".to_string())
        );
        Ok(ActiveLogger {
            level,
            log_dir: log_dir.map(Path::to_path_buf),
            _handle: handle,
        })
    })?;
    check_same(active, level, log_dir)
}

fn check_same(active: &ActiveLogger, level: &str, log_dir: Option<&Path>) -> Result<(), String> {
    if active.log_dir.as_deref() != log_dir {
        return Err("logging already initialized with a different sink".to_string());
    }
    if active.level != level {
        return Err(format!(
            "logging already initialized at level `{}`; refusing `{}`",
            active.level, level
        ));
    }
    Ok(())
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        "off" => Ok("off"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error|off"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_normalize() {
        assert_eq!(normalize_level(" WARNING ").unwrap(), "warn");
        assert_eq!(normalize_level("off").unwrap(), "off");
        assert!(normalize_level("loud").is_err());
    }

    #[test]
    fn second_init_must_match_first() {
        let dir = std::env::temp_dir().join(format!("rollbookd-log-{}", uuid::Uuid::new_v4()));
        init_logging("info", Some(&dir)).expect("first init");
        init_logging("info", Some(&dir)).expect("same setup is a no-op");
        assert!(init_logging("debug", Some(&dir)).is_err());
        assert!(init_logging("info", None).is_err());
    }
}
