//! Tracing setup: rolling log file plus an optional stderr layer.
//!
//! Chat output goes to stdout, so console logging is off unless asked for.

use std::path::Path;
use std::time::{Duration, SystemTime};
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::schema::LoggingConfig;
use crate::utils::{ensure_dir, expand_tilde};

const LOG_FILE_PREFIX: &str = "nebula.log";

/// Build the env filter from `RUST_LOG` or the configured level plus overrides
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for (module, level) in &config.overrides {
        match format!("{}={}", module, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(_) => eprintln!("Invalid log directive: {}={}", module, level),
        }
    }
    filter
}

/// Initialize the logging system.
///
/// The returned guard flushes the file writer on drop and must be kept
/// alive for the duration of the program.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<WorkerGuard> {
    let filter = build_filter(config);

    let format_str = std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.format.clone());
    let is_json = format_str.eq_ignore_ascii_case("json");

    // rolling::daily produces nebula.log.YYYY-MM-DD
    let log_dir = ensure_dir(expand_tilde(&config.dir))?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = if is_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let console_layer = config.console.then(|| {
        if is_json {
            fmt::layer().json().with_writer(std::io::stderr).boxed()
        } else {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    });

    Registry::default()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    if let Err(e) = cleanup_old_logs(&log_dir, config.retention_days) {
        eprintln!("Failed to clean up old logs: {}", e);
    }

    Ok(guard)
}

/// Remove rotated log files older than `days` days
fn cleanup_old_logs(dir: &Path, days: u64) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let threshold = Duration::from_secs(days * 24 * 3600);
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| name.starts_with(LOG_FILE_PREFIX))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if let Some(age) = age {
            if age > threshold {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
                }
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_keeps_fresh_and_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("nebula.log.2026-01-01"), "x").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

        // everything was just written, nothing is old enough
        let removed = cleanup_old_logs(temp_dir.path(), 7).unwrap();
        assert_eq!(removed, 0);
        assert!(temp_dir.path().join("nebula.log.2026-01-01").exists());
    }

    #[test]
    fn test_cleanup_with_zero_retention_removes_only_logs() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("nebula.log.2026-01-01"), "x").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = cleanup_old_logs(temp_dir.path(), 0).unwrap();
        assert_eq!(removed, 1);
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert_eq!(cleanup_old_logs(&missing, 7).unwrap(), 0);
    }

    #[test]
    fn test_build_filter_skips_bad_override() {
        let mut config = LoggingConfig::default();
        config
            .overrides
            .insert("nebula_agent".to_string(), "debug".to_string());
        config
            .overrides
            .insert("bad module".to_string(), "???".to_string());
        // must not panic
        let _ = build_filter(&config);
    }
}
