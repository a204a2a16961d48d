//! Cleanup of old runs in two phases: `plan` selects candidates without side
//! effects, `apply` deletes them one by one. A dry run is just `plan`.

use chrono::{DateTime, Duration, Utc};
use std::io;
use std::path::Path;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::Run;

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the N most recent runs.
    KeepLast(usize),
    /// Drop runs created before `now - duration`.
    OlderThan(Duration),
}

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub policy: RetentionPolicy,
    pub dry_run: bool,
}

pub fn plan(db: &Database, policy: RetentionPolicy, now: DateTime<Utc>) -> Result<Vec<Run>> {
    match policy {
        RetentionPolicy::KeepLast(keep) => db.runs_except_last(keep),
        RetentionPolicy::OlderThan(age) => {
            let cutoff = now
                .checked_sub_signed(age)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            db.runs_older_than(cutoff)
        }
    }
}

/// Delete every planned run. Stops at the first run whose row cannot be
/// deleted; runs removed before that stay removed.
pub fn apply(db: &Database, runs: &[Run]) -> Result<usize> {
    let mut removed = 0;
    for run in runs {
        remove_run(db, run)?;
        removed += 1;
    }
    Ok(removed)
}

/// Delete the row, then its log. A crash in between leaves at worst an
/// orphaned log file, never a row pointing at a deleted log.
pub fn remove_run(db: &Database, run: &Run) -> Result<()> {
    db.delete_run(&run.id)?;
    if let Some(path) = &run.stdout_path {
        remove_log(Path::new(path));
    }
    debug!(id = %run.id, "removed run");
    Ok(())
}

fn remove_log(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove log file"),
    }
}

/// Parse a retention age such as `7d`, `2w`, `24h`, `90s` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || {
        Error::InvalidArgument(format!(
            "invalid duration '{}' (expected e.g. 7d, 24h, 1h30m)",
            input
        ))
    };

    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_ms: i64 = 0;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        let value: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit_ms = match &rest[..unit_len] {
            "w" => 7 * MS_PER_DAY,
            "d" => MS_PER_DAY,
            "h" => MS_PER_HOUR,
            "m" => MS_PER_MINUTE,
            "s" => MS_PER_SECOND,
            "ms" => 1,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        total_ms = value
            .checked_mul(unit_ms)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(invalid)?;
    }

    Ok(Duration::milliseconds(total_ms))
}
