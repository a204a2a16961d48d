//! Where runar keeps its data.
//!
//! Everything lives under one root directory:
//!   1. `RUNAR_DIR` env var (if set and non-empty)
//!   2. `.runar` in the current directory
//!
//! The root holds `experiments.db` and a `logs/` directory with one
//! `<run-id>.log` per run.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const ROOT_ENV: &str = "RUNAR_DIR";
const DEFAULT_ROOT: &str = ".runar";
const DB_FILE: &str = "experiments.db";
const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    /// Resolve the root from the environment, relative to `cwd`.
    pub fn resolve(cwd: &Path) -> Self {
        match std::env::var(ROOT_ENV) {
            Ok(dir) if !dir.is_empty() => Layout::new(cwd.join(dir)),
            _ => Layout::new(cwd.join(DEFAULT_ROOT)),
        }
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.log", id))
    }

    /// Create the root and logs directory. Existing directories are fine.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.logs_dir())
    }

    /// Create the log file for `id`. Fails if it already exists, so two runs
    /// never share a log.
    pub fn create_log(&self, id: &str) -> io::Result<(PathBuf, File)> {
        let path = self.log_path(id);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok((path, file))
    }
}
