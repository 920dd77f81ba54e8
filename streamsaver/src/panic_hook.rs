//! Panic reporting.

use chrono::{Local, NaiveDate};
use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::{Path, PathBuf},
    thread,
};

use crate::logging::LOG_FILE_PREFIX;

/// Installs a panic hook that reports through `tracing`.
///
/// In `panic = "abort"` builds the non-blocking file writer may never flush,
/// so the record is also appended straight to today's log file in `log_dir`.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = panic_record(panic_info);
            tracing::error!(target: "streamsaver::panic", "{record}");

            if cfg!(panic = "abort") {
                let path = daily_log_path(&log_dir, Local::now().date_naive());
                let _ = append_line(&path, &record);
            }
        }));

        previous_hook(panic_info);
    }));
}

/// Path of the file the daily appender writes on `date`.
fn daily_log_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("{LOG_FILE_PREFIX}.{}", date.format("%Y-%m-%d")))
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.flush()
}

fn panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={}\nBacktrace:\n{}",
        payload_text(panic_info),
        Backtrace::force_capture()
    )
}

fn payload_text(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_info.payload();
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| panic_info.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_path_matches_appender_naming() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            daily_log_path(Path::new("logs"), date),
            PathBuf::from("logs/streamsaver.log.2024-03-01")
        );
    }

    #[test]
    fn appends_to_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamsaver.log.2024-03-01");
        std::fs::write(&path, "first\n").unwrap();

        append_line(&path, "PANIC here").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nPANIC here\n");
    }
}
