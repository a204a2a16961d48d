mod db;
mod display;
mod error;
mod git;
mod id;
mod models;
mod paths;
mod retention;
mod runner;
mod tracker;

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::process;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use db::Database;
use error::{Error, Result};
use paths::Layout;
use retention::{CleanOptions, RetentionPolicy};
use tracker::{RunOptions, Tracker};

const LOG_ENV: &str = "RUNAR_LOG";
const RULE: &str = "─────────────────────────────────────────";

#[derive(Parser, Debug)]
#[command(
    name = "runar",
    author,
    version,
    about = "Zero-config command tracking",
    after_help = "Any command that is not a runar subcommand is tracked directly: `runar python train.py`"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Name for this run")]
    name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run and track a command
    Run {
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },

    /// List runs, newest first
    #[command(visible_alias = "list")]
    Ls {
        #[arg(short, long, default_value_t = 0, help = "Limit number of runs (0 = no limit)")]
        limit: usize,

        #[arg(long, help = "Print runs as JSON")]
        json: bool,
    },

    /// Show run details
    Show {
        id: String,

        #[arg(long, help = "Print the run as JSON")]
        json: bool,
    },

    /// Print the captured output of a run
    Logs { id: String },

    /// Delete a run and its log
    #[command(visible_aliases = ["remove", "delete"])]
    Rm {
        id: String,

        #[arg(short, long, help = "Delete without confirmation")]
        force: bool,
    },

    /// Remove old runs
    Clean {
        #[arg(long, value_name = "N", conflicts_with = "older_than", help = "Keep last N runs, delete the rest")]
        keep: Option<usize>,

        #[arg(
            long = "older-than",
            visible_alias = "older",
            value_name = "DURATION",
            help = "Delete runs older than DURATION (e.g. 7d, 24h)"
        )]
        older_than: Option<String>,

        #[arg(long, help = "Show what would be deleted")]
        dry_run: bool,
    },
}

const SUBCOMMANDS: &[&str] = &[
    "run", "ls", "list", "show", "logs", "rm", "remove", "delete", "clean", "help",
];

/// `runar [-n NAME] CMD ARGS...` is shorthand for `runar run [-n NAME] CMD ARGS...`.
fn implicit_run(mut args: Vec<OsString>) -> Vec<OsString> {
    let mut skip_value = false;
    for i in 1..args.len() {
        let arg = args[i].to_string_lossy().into_owned();
        if skip_value {
            skip_value = false;
            continue;
        }
        if arg == "--" {
            args.insert(i, "run".into());
            return args;
        }
        if arg.starts_with('-') {
            skip_value = arg == "-n" || arg == "--name";
            continue;
        }
        if !SUBCOMMANDS.contains(&arg.as_str()) {
            args.insert(i, "run".into());
        }
        return args;
    }
    args
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse_from(implicit_run(env::args_os().collect()));

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run { command } => handle_run(&command, RunOptions { name: cli.name }),
        Commands::Ls { limit, json } => handle_list(limit, json),
        Commands::Show { id, json } => handle_show(&id, json),
        Commands::Logs { id } => handle_logs(&id),
        Commands::Rm { id, force } => handle_remove(&id, force),
        Commands::Clean {
            keep,
            older_than,
            dry_run,
        } => {
            let policy = match (keep, older_than) {
                (Some(keep), _) => RetentionPolicy::KeepLast(keep),
                (None, Some(age)) => RetentionPolicy::OlderThan(retention::parse_duration(&age)?),
                (None, None) => {
                    return Err(Error::InvalidArgument(
                        "specify --keep N or --older-than DURATION (e.g. 7d, 24h)".to_string(),
                    ))
                }
            };
            handle_clean(CleanOptions { policy, dry_run })
        }
    }
}

fn open_store() -> Result<Database> {
    let layout = Layout::resolve(&env::current_dir()?);
    Database::open(&layout.db_path())
}

/// Ctrl-C reaches the child through the terminal's process group; the
/// wrapper stays alive so the run still gets finalized.
fn keep_running_on_interrupt() {
    if let Err(e) = ctrlc::set_handler(|| {}) {
        warn!(error = %e, "could not install interrupt handler");
    }
}

fn handle_run(command: &[String], opts: RunOptions) -> Result<i32> {
    let cwd = env::current_dir()?;
    let layout = Layout::resolve(&cwd);
    let db = Database::open(&layout.db_path())?;
    let tracker = Tracker::new(&db, &layout, git::Git);

    let recorded = tracker.record(command, &opts, &cwd)?;
    eprintln!("[runar] ▶ {}", recorded.id);
    eprintln!("{}", RULE);

    keep_running_on_interrupt();
    let finished = tracker.execute(recorded)?;

    eprintln!("{}", RULE);
    let elapsed = display::format_elapsed(finished.elapsed);
    if finished.exit_code == 0 {
        eprintln!("[runar] ✓ Done (exit 0) | {}", elapsed);
    } else {
        eprintln!(
            "[runar] ✗ Failed (exit {}) | {}",
            finished.exit_code, elapsed
        );
    }
    Ok(finished.exit_code)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).map_err(io::Error::from)?;
    writeln!(out)?;
    Ok(())
}

fn handle_list(limit: usize, json: bool) -> Result<i32> {
    let db = open_store()?;
    let runs = db.list_runs(limit)?;

    if json {
        print_json(&runs)?;
        return Ok(0);
    }
    let mut out = io::stdout().lock();
    if runs.is_empty() {
        writeln!(out, "No runs found")?;
        return Ok(0);
    }

    display::write_table(&mut out, &runs, Utc::now())?;
    Ok(0)
}

fn handle_show(id: &str, json: bool) -> Result<i32> {
    let db = open_store()?;
    let run = db.get_run(id)?;

    if json {
        print_json(&run)?;
    } else {
        display::write_details(&mut io::stdout().lock(), &run, Utc::now())?;
    }
    Ok(0)
}

fn handle_logs(id: &str) -> Result<i32> {
    let db = open_store()?;
    let run = db.get_run(id)?;
    let path = run
        .stdout_path
        .ok_or_else(|| Error::NoLogs(id.to_string()))?;

    let mut file = File::open(&path)?;
    io::copy(&mut file, &mut io::stdout().lock())?;
    Ok(0)
}

fn confirm(prompt: &str) -> Result<bool> {
    let mut out = io::stdout().lock();
    write!(out, "{} [y/N]: ", prompt)?;
    out.flush()?;
    drop(out);
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}

fn handle_remove(id: &str, force: bool) -> Result<i32> {
    if !force && !confirm(&format!("Delete {}?", id))? {
        writeln!(io::stdout().lock(), "Canceled")?;
        return Ok(0);
    }

    let db = open_store()?;
    let run = db.get_run(id)?;
    retention::remove_run(&db, &run)?;
    writeln!(io::stdout().lock(), "Deleted: {}", id)?;
    Ok(0)
}

fn handle_clean(opts: CleanOptions) -> Result<i32> {
    let db = open_store()?;
    let planned = retention::plan(&db, opts.policy, Utc::now())?;
    let mut out = io::stdout().lock();

    if planned.is_empty() {
        writeln!(out, "Nothing to clean")?;
        return Ok(0);
    }

    if opts.dry_run {
        writeln!(out, "Would delete {} runs", planned.len())?;
        for run in &planned {
            writeln!(out, "  - {} ({})", run.id, display::truncate(&run.command, 30))?;
        }
        return Ok(0);
    }

    let removed = retention::apply(&db, &planned)?;
    writeln!(out, "✓ Cleaned {} runs", removed)?;
    Ok(0)
}
