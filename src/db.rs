use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{GitInfo, NewRun, Run, RunStatus};

const CURRENT_VERSION: i32 = 2;

/// SQLite expression producing the store's timestamp text, e.g. `2024-05-01T09:30:00.125Z`.
/// Fixed width, so text order is time order.
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const RUN_COLUMNS: &str = "id, name, command, status, exit_code, git_commit, git_branch,
     git_dirty, workdir, stdout_path, created_at, finished_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened run store");
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let mut db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&mut self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            self.create_initial_schema()?;
        }

        if version < 2 {
            self.migrate_to_v2()?;
        }

        Ok(())
    }

    /// The original single-table layout. Stores written by older releases
    /// already have it and never set `user_version`, so this must be a no-op for them.
    fn create_initial_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                name TEXT,
                status TEXT DEFAULT 'running',
                command TEXT,
                exit_code INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                finished_at DATETIME
            );

            PRAGMA user_version = 1;",
        )?;
        Ok(())
    }

    fn column_exists(&self, column: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('runs') WHERE name = ?",
            params![column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn migrate_to_v2(&mut self) -> Result<()> {
        let mut missing = Vec::new();
        for (column, decl) in [
            ("git_commit", "TEXT"),
            ("git_branch", "TEXT"),
            ("git_dirty", "BOOLEAN"),
            ("workdir", "TEXT"),
            ("stdout_path", "TEXT"),
        ] {
            if !self.column_exists(column)? {
                missing.push((column, decl));
            }
        }

        let tx = self.conn.transaction()?;
        for (column, decl) in missing {
            tx.execute(&format!("ALTER TABLE runs ADD COLUMN {} {}", column, decl), [])?;
        }

        // Rows written with CURRENT_TIMESTAMP look like `2024-05-01 09:30:00`.
        tx.execute_batch(
            "UPDATE runs SET created_at = strftime('%Y-%m-%dT%H:%M:%fZ', created_at)
                 WHERE created_at IS NOT NULL AND created_at NOT LIKE '____-__-__T%Z';
             UPDATE runs SET finished_at = strftime('%Y-%m-%dT%H:%M:%fZ', finished_at)
                 WHERE finished_at IS NOT NULL AND finished_at NOT LIKE '____-__-__T%Z';
             CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);",
        )?;
        tx.execute(&format!("PRAGMA user_version = {}", CURRENT_VERSION), [])?;
        tx.commit()?;
        Ok(())
    }

    /// Insert a new run in `running` state. `created_at` is stamped here.
    pub fn create_run(&self, run: &NewRun) -> Result<()> {
        let git = run.git.as_ref();
        let sql = format!(
            "INSERT INTO runs (id, name, command, status, git_commit, git_branch, git_dirty,
                               workdir, stdout_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, {})",
            NOW
        );
        let result = self.conn.execute(
            &sql,
            params![
                run.id,
                run.name,
                run.command,
                RunStatus::Running.as_str(),
                git.map(|g| g.commit.as_str()),
                git.map(|g| g.branch.as_str()),
                git.map(|g| g.dirty),
                run.workdir,
                run.stdout_path,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(Error::DuplicateId(run.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_run(&self, id: &str) -> Result<Run> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![id], map_run)
            .optional()?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Most recent first. `limit == 0` returns every run.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {} FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            RUN_COLUMNS
        );
        self.query_runs(&sql, params![sql_limit(limit)])
    }

    /// Record the exit of a run. Calling it twice overwrites `finished_at`.
    pub fn finish_run(&self, id: &str, exit_code: i32) -> Result<()> {
        let sql = format!(
            "UPDATE runs SET status = ?1, exit_code = ?2, finished_at = {} WHERE id = ?3",
            NOW
        );
        let affected = self.conn.execute(
            &sql,
            params![RunStatus::from_exit_code(exit_code).as_str(), exit_code, id],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn delete_run(&self, id: &str) -> Result<()> {
        let affected = self
            .conn
            .execute("DELETE FROM runs WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Every run except the `keep` most recent, newest first.
    pub fn runs_except_last(&self, keep: usize) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {} FROM runs ORDER BY created_at DESC, rowid DESC LIMIT -1 OFFSET ?1",
            RUN_COLUMNS
        );
        let offset = i64::try_from(keep).unwrap_or(i64::MAX);
        self.query_runs(&sql, params![offset])
    }

    /// Runs created strictly before `cutoff`, newest first.
    pub fn runs_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {} FROM runs WHERE created_at < ?1 ORDER BY created_at DESC, rowid DESC",
            RUN_COLUMNS
        );
        self.query_runs(&sql, params![format_timestamp(cutoff)])
    }

    #[cfg(test)]
    pub(crate) fn set_created_at(&self, id: &str, ts: DateTime<Utc>) {
        self.conn
            .execute(
                "UPDATE runs SET created_at = ?1 WHERE id = ?2",
                params![format_timestamp(ts), id],
            )
            .unwrap();
    }

    fn query_runs(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare(sql)?;
        let runs = stmt
            .query_map(params, map_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

/// SQLite treats a negative LIMIT as unbounded.
fn sql_limit(limit: usize) -> i64 {
    if limit == 0 {
        -1
    } else {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<RunStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;

    let git = match (
        row.get::<_, Option<String>>(5)?,
        row.get::<_, Option<String>>(6)?,
        row.get::<_, Option<bool>>(7)?,
    ) {
        (Some(commit), Some(branch), Some(dirty)) => Some(GitInfo {
            commit,
            branch,
            dirty,
        }),
        _ => None,
    };

    let created_at: String = row.get(10)?;
    let finished_at: Option<String> = row.get(11)?;

    Ok(Run {
        id: row.get(0)?,
        name: row.get(1)?,
        command: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        status,
        exit_code: row.get(4)?,
        git,
        workdir: row.get(8)?,
        stdout_path: row.get(9)?,
        created_at: parse_timestamp(10, &created_at)?,
        finished_at: finished_at
            .as_deref()
            .map(|text| parse_timestamp(11, text))
            .transpose()?,
    })
}
