use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
}

impl RunStatus {
    /// Terminal status for a finished process.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            RunStatus::Success
        } else {
            RunStatus::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// One tracked execution as stored in the `runs` table.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: String,
    pub name: Option<String>,
    pub command: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    #[serde(flatten)]
    pub git: Option<GitInfo>,
    pub workdir: Option<String>,
    pub stdout_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the caller when a run is first recorded.
/// Status, exit code and timestamps belong to the store.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: String,
    pub name: Option<String>,
    pub command: String,
    pub git: Option<GitInfo>,
    pub workdir: Option<String>,
    pub stdout_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitInfo {
    #[serde(rename = "git_commit")]
    pub commit: String,
    #[serde(rename = "git_branch")]
    pub branch: String,
    #[serde(rename = "git_dirty")]
    pub dirty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_exit_code() {
        assert_eq!(RunStatus::from_exit_code(0), RunStatus::Success);
        assert_eq!(RunStatus::from_exit_code(1), RunStatus::Failure);
        assert_eq!(RunStatus::from_exit_code(-1), RunStatus::Failure);
        assert_eq!(RunStatus::from_exit_code(130), RunStatus::Failure);
    }

    #[test]
    fn status_text_round_trips() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Failure] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("error".parse::<RunStatus>().is_err());
    }
}
