use chrono::{DateTime, SecondsFormat, Utc};
use std::io::{self, Write};
use std::time::Duration;

use crate::models::Run;

const COMMAND_WIDTH: usize = 30;

/// Shorten to `max` characters, ending in `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Compact elapsed time: `4s`, `2m 5s`, `1h 3m`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = (elapsed.as_millis() + 500) / 1000;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Wall time of a run; still-running runs are measured up to `now`.
pub fn run_duration(run: &Run, now: DateTime<Utc>) -> String {
    let end = run.finished_at.unwrap_or(now);
    format_elapsed((end - run.created_at).to_std().unwrap_or_default())
}

pub fn shorten_path(path: &str) -> String {
    if let Some(home) = dirs::home_dir() {
        let home_str = home.to_string_lossy();
        if !home_str.is_empty() && path.starts_with(home_str.as_ref()) {
            return path.replacen(home_str.as_ref(), "~", 1);
        }
    }
    path.to_string()
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Column-aligned listing, one run per line under a header.
pub fn write_table(out: &mut impl Write, runs: &[Run], now: DateTime<Utc>) -> io::Result<()> {
    let header = ["ID", "STATUS", "COMMAND", "DURATION", "CREATED"];
    let rows: Vec<[String; 5]> = runs
        .iter()
        .map(|run| {
            [
                run.id.clone(),
                run.status.to_string(),
                truncate(&run.command, COMMAND_WIDTH),
                run_duration(run, now),
                timestamp(run.created_at),
            ]
        })
        .collect();

    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut write_row = |cells: [&str; 5]| -> io::Result<()> {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i + 1 == cells.len() {
                line.push_str(cell);
            } else {
                let pad = widths[i] - cell.chars().count() + 2;
                line.push_str(cell);
                line.push_str(&" ".repeat(pad));
            }
        }
        writeln!(out, "{}", line)
    };

    write_row(header)?;
    for row in &rows {
        write_row([&row[0], &row[1], &row[2], &row[3], &row[4]])?;
    }
    Ok(())
}

pub fn write_details(out: &mut impl Write, run: &Run, now: DateTime<Utc>) -> io::Result<()> {
    writeln!(out, "ID:       {}", run.id)?;
    if let Some(name) = &run.name {
        writeln!(out, "Name:     {}", name)?;
    }
    writeln!(out, "Command:  {}", run.command)?;
    writeln!(out, "Status:   {}", run.status)?;
    writeln!(out, "Started:  {}", timestamp(run.created_at))?;
    writeln!(out, "Duration: {}", run_duration(run, now))?;

    if let Some(git) = &run.git {
        let dirty = if git.dirty { " (dirty)" } else { "" };
        writeln!(out, "Git:      {}@{}{}", git.branch, git.commit, dirty)?;
    }
    if let Some(workdir) = &run.workdir {
        writeln!(out, "Workdir:  {}", shorten_path(workdir))?;
    }
    if let Some(code) = run.exit_code {
        writeln!(out, "Exit:     {}", code)?;
    }
    if let Some(path) = &run.stdout_path {
        writeln!(out, "Logs:     {}", path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GitInfo, RunStatus};
    use chrono::TimeZone;

    fn sample(id: &str, command: &str) -> Run {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Run {
            id: id.to_string(),
            name: None,
            command: command.to_string(),
            status: RunStatus::Success,
            exit_code: Some(0),
            git: None,
            workdir: None,
            stdout_path: None,
            created_at: created,
            finished_at: Some(created + chrono::Duration::seconds(75)),
        }
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("echo hi", 30), "echo hi");
        assert_eq!(truncate("abcdef", 6), "abcdef");
    }

    #[test]
    fn truncate_marks_cut_strings() {
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 5), "éé...");
    }

    #[test]
    fn elapsed_formats() {
        assert_eq!(format_elapsed(Duration::from_millis(400)), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(4)), "4s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_elapsed(Duration::from_secs(3780)), "1h 3m");
    }

    #[test]
    fn running_duration_measures_to_now() {
        let mut run = sample("run_1", "sleep 100");
        run.status = RunStatus::Running;
        run.exit_code = None;
        run.finished_at = None;
        let now = run.created_at + chrono::Duration::seconds(42);
        assert_eq!(run_duration(&run, now), "42s");
    }

    #[test]
    fn table_aligns_columns() {
        let runs = vec![
            sample("run_0000aaaa", "echo hello"),
            sample("run_0000bbbb", "python train.py --epochs 100 --lr 0.001"),
        ];
        let mut out = Vec::new();
        write_table(&mut out, &runs, Utc::now()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID            STATUS   COMMAND"));
        assert!(lines[1].starts_with("run_0000aaaa  success  echo hello"));
        assert!(lines[2].contains("python train.py --epochs 10..."));
        assert!(lines[1].contains("1m 15s"));
        assert!(lines[1].ends_with("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn details_include_git_and_exit() {
        let mut run = sample("run_0000cccc", "make");
        run.name = Some("build".to_string());
        run.git = Some(GitInfo {
            commit: "abc1234".to_string(),
            branch: "main".to_string(),
            dirty: true,
        });
        run.stdout_path = Some("/tmp/x.log".to_string());

        let mut out = Vec::new();
        write_details(&mut out, &run, Utc::now()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Name:     build\n"));
        assert!(text.contains("Git:      main@abc1234 (dirty)\n"));
        assert!(text.contains("Exit:     0\n"));
        assert!(text.contains("Logs:     /tmp/x.log\n"));
        assert!(!text.contains("Workdir:"));
    }
}
