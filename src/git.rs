use std::path::Path;
use std::process::{Command, Stdio};
use crate::models::GitInfo;

/// Source-control context for a working directory. Absence is a valid answer.
pub trait RepoProbe {
    fn probe(&self, cwd: &Path) -> Option<GitInfo>;
}

/// Probes by shelling out to `git`.
pub struct Git;

impl RepoProbe for Git {
    fn probe(&self, cwd: &Path) -> Option<GitInfo> {
        detect_repo_info(cwd)
    }
}

pub fn detect_repo_info(cwd: &Path) -> Option<GitInfo> {
    let commit = run_git_command(cwd, &["rev-parse", "--short", "HEAD"])
        .filter(|commit| !commit.is_empty())?;
    let branch = run_git_command(cwd, &["rev-parse", "--abbrev-ref", "HEAD"])
        .filter(|branch| !branch.is_empty())
        .unwrap_or_else(|| "HEAD".to_string());
    let dirty = run_git_command(cwd, &["status", "--porcelain"])
        .map(|out| !out.is_empty())
        .unwrap_or(false);

    Some(GitInfo {
        commit,
        branch,
        dirty,
    })
}

fn run_git_command(cwd: &Path, args: &[&str]) -> Option<String> {
    Command::new("git")
        .current_dir(cwd)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|out| out.trim().to_string())
}
