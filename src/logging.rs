// src/logging.rs
//
// `tlog!`: timestamped stderr logging, mirrored into a per-run log file once
// `init_file_logging` has been called.

use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Timestamped logging, `format!` syntax.
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::write_line(format_args!($($arg)*))
    };
}

/// Mirror file of the current run, if any
static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

/// Symlink that always points at the newest run's log
const LATEST_LOG_NAME: &str = "AirLink.log";

/// `HH:MM:SS.mmm` local time prefix of every log line
fn stamp() -> impl fmt::Display {
    Local::now().format("%H:%M:%S%.3f")
}

/// Per-run log file name, sortable by start time
fn run_log_name(started: DateTime<Local>) -> String {
    started.format("%Y%m%d-%H%M%S-AirLink.log").to_string()
}

/// Write one line to stderr and, when enabled, the mirror file.
/// Backs `tlog!`; call the macro instead.
pub(crate) fn write_line(args: fmt::Arguments<'_>) {
    let line = format!("{} {}", stamp(), args);
    eprintln!("{}", line);

    let mut guard = LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(file) = guard.as_mut() {
        let _ = writeln!(file, "{}", line);
    }
}

/// Start mirroring log lines into a new file under `log_dir`.
/// Returns the path of that file.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let name = run_log_name(Local::now());
    let log_path = log_dir.join(&name);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;
    let _ = writeln!(
        file,
        "{} [logging] AirLink {} run log",
        stamp(),
        env!("CARGO_PKG_VERSION")
    );

    #[cfg(unix)]
    point_latest_at(log_dir, &name);

    *LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
    tlog!("[logging] File logging started: {}", log_path.display());
    Ok(log_path)
}

/// Repoint the latest-log symlink. Skipped on Windows, where creating
/// symlinks needs elevated privileges.
#[cfg(unix)]
fn point_latest_at(log_dir: &Path, name: &str) {
    let link = log_dir.join(LATEST_LOG_NAME);
    let _ = std::fs::remove_file(&link);
    if let Err(e) = std::os::unix::fs::symlink(name, &link) {
        tlog!("[logging] Failed to create {} symlink: {}", LATEST_LOG_NAME, e);
    }
}

/// Stop mirroring and close the log file
pub fn stop_file_logging() {
    let closed = LOG_FILE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if closed.is_some() {
        tlog!("[logging] File logging stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_log_name_sorts_by_start_time() {
        let started = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(run_log_name(started), "20260307-090501-AirLink.log");
    }

    #[test]
    fn test_file_logging_writes_mirror_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_file_logging(dir.path()).unwrap();

        tlog!("[logging] hello from test {}", 42);
        stop_file_logging();
        tlog!("[logging] after stop");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("run log"));
        assert!(contents.contains("[logging] hello from test 42"));
        assert!(!contents.contains("after stop"));

        #[cfg(unix)]
        assert!(dir.path().join(LATEST_LOG_NAME).exists());
    }
}
