//! Time-windowed trimming of the run log.

use std::path::Path;

use chrono::{Duration, NaiveDateTime};

pub const RETENTION_DAYS: i64 = 3;

/// Timestamp prefix written by [`crate::logging`] on every entry.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%6f";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionStats {
    pub kept: usize,
    pub dropped: usize,
    /// Lines without a timestamp and without an entry before them.
    pub orphaned: usize,
}

/// Rewrites `path` so only entries newer than `now - window` remain.
///
/// A line without a leading timestamp continues the entry above it and is
/// kept or dropped together with it. A missing file is created empty.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be read or written.
pub fn prune_log(path: &Path, now: NaiveDateTime, window: Duration) -> std::io::Result<RetentionStats> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let (retained, stats) = retain_recent(&contents, now - window);
    std::fs::write(path, retained)?;
    Ok(stats)
}

fn retain_recent(contents: &str, cutoff: NaiveDateTime) -> (String, RetentionStats) {
    let mut out = String::with_capacity(contents.len());
    let mut stats = RetentionStats::default();
    let mut keep_current: Option<bool> = None;

    for line in contents.split_inclusive('\n') {
        if let Some(ts) = leading_timestamp(line) {
            keep_current = Some(ts >= cutoff);
        }

        match keep_current {
            Some(true) => {
                out.push_str(line);
                stats.kept += 1;
            }
            Some(false) => stats.dropped += 1,
            None => stats.orphaned += 1,
        }
    }

    (out, stats)
}

pub(crate) fn leading_timestamp(line: &str) -> Option<NaiveDateTime> {
    let mut parts = line.split(' ');
    let date = parts.next()?;
    let time = parts.next()?;
    NaiveDateTime::parse_from_str(&format!("{date} {}", time.trim_end()), LOG_TIMESTAMP_FORMAT).ok()
}
