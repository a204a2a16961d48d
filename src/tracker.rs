//! Lifecycle of one tracked run: record it as `running`, execute the command
//! with its output teed into the run's log, then finalize the record.

use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::git::RepoProbe;
use crate::models::NewRun;
use crate::paths::Layout;
use crate::{id, runner};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub name: Option<String>,
}

pub struct Tracker<'a, P> {
    db: &'a Database,
    layout: &'a Layout,
    probe: P,
}

/// A run that has a row and an open log file but has not executed yet.
/// The log handle is released when this value is consumed or dropped.
pub struct Recorded {
    pub id: String,
    argv: Vec<String>,
    log: File,
    started: Instant,
}

#[derive(Debug)]
pub struct Finished {
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl<'a, P: RepoProbe> Tracker<'a, P> {
    pub fn new(db: &'a Database, layout: &'a Layout, probe: P) -> Self {
        Tracker { db, layout, probe }
    }

    /// Generate an id, gather context, create the log file and insert the
    /// `running` row. Nothing is executed unless this succeeds.
    pub fn record(&self, argv: &[String], opts: &RunOptions, cwd: &Path) -> Result<Recorded> {
        if argv.is_empty() {
            return Err(Error::InvalidArgument("no command given".to_string()));
        }
        let started = Instant::now();
        let id = id::generate();
        let git = self.probe.probe(cwd);
        debug!(id = %id, git = git.is_some(), "initialized run");

        self.layout.ensure()?;
        let (log_path, log) = self.layout.create_log(&id)?;

        let new_run = NewRun {
            id: id.clone(),
            name: opts.name.clone(),
            command: argv.join(" "),
            git,
            workdir: Some(cwd.to_string_lossy().into_owned()),
            stdout_path: Some(log_path.to_string_lossy().into_owned()),
        };
        if let Err(e) = self.db.create_run(&new_run) {
            drop(log);
            if let Err(rm) = std::fs::remove_file(&log_path) {
                warn!(path = %log_path.display(), error = %rm, "could not remove unused log");
            }
            return Err(e);
        }
        debug!(id = %id, log = %log_path.display(), "recorded run");

        Ok(Recorded {
            id,
            argv: argv.to_vec(),
            log,
            started,
        })
    }

    /// Execute a recorded run and write its exit status back.
    ///
    /// If the command cannot be started the row stays `running`.
    pub fn execute(&self, recorded: Recorded) -> Result<Finished> {
        let Recorded {
            id,
            argv,
            mut log,
            started,
        } = recorded;

        let exit_code = match runner::execute(&argv, &mut log) {
            Ok(code) => code,
            Err(e) => {
                warn!(id = %id, error = %e, "command did not start; run left as running");
                return Err(e);
            }
        };
        drop(log);

        self.db.finish_run(&id, exit_code)?;
        debug!(id = %id, exit_code, "finalized run");

        Ok(Finished {
            exit_code,
            elapsed: started.elapsed(),
        })
    }
}
