//! # Tracing Setup
//!
//! Installs the process-wide `tracing` subscriber used by the servers: an
//! `EnvFilter` (from `RUST_LOG`, falling back to the configured level), a
//! console layer and, when a log directory is given, a non-blocking file
//! layer. Old log files of the same application are pruned on start so only
//! the newest one survives alongside the new file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber.
///
/// Hold the returned guard until the process exits, or buffered file output
/// is lost.
pub fn init_tracing(app_name: &str, log_dir: Option<&Path>, level: &str) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer().with_target(true);

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()
            .map_err(io::Error::other)?;
        return Ok(None);
    };

    fs::create_dir_all(log_dir)?;
    if let Err(e) = cleanup_old_logs(log_dir, app_name) {
        eprintln!("Failed to prune old logs in {}: {e}", log_dir.display());
    }

    let file_name = format!("{app_name}_{}.log", chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S"));
    let appender = tracing_appender::rolling::never(log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .map_err(io::Error::other)?;
    Ok(Some(guard))
}

/// Deletes all but the newest `<app_name>_*.log` file in `log_dir`.
///
/// Returns the removed paths.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("{app_name}_");
    let mut entries: Vec<(PathBuf, std::time::SystemTime)> = fs::read_dir(log_dir)?
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(".log")
        })
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((e.path(), modified))
        })
        .collect();

    // Newest first, name as tie-breaker since names carry the start time.
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = Vec::new();
    for (path, _) in entries.into_iter().skip(1) {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) => eprintln!("Failed to delete old log file {}: {e}", path.display()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_keeps_only_the_newest_log_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "relay_backend_2026-01-01_00-00-00.log",
            "relay_backend_2026-01-02_00-00-00.log",
            "other_app_2026-01-01_00-00-00.log",
            "relay_backend_notes.txt",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        let removed = cleanup_old_logs(dir.path(), "relay_backend").unwrap();
        assert_eq!(removed.len(), 1);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left.len(), 3);
        assert!(left.contains(&"other_app_2026-01-01_00-00-00.log".to_string()));
        assert!(left.contains(&"relay_backend_notes.txt".to_string()));
    }
}
