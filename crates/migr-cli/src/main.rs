//! `migr`: CLI surface (C11) over the Migration Controller (§6). Each
//! subcommand infers its DB paths from `--dir`, installs a `tracing`
//! subscriber, and dispatches into `migr-workflow`.

mod output;
mod paths;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migr", about = "Hot-migration engine for a declarative SQLite schema tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory to operate in; defaults to the current working directory.
    #[arg(short = 'd', long = "dir", global = true)]
    dir: Option<PathBuf>,

    /// Raise the log floor from `info` to `debug` for this invocation.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Emit machine-readable `key=value` output where applicable.
    #[arg(long = "porcelain", global = true)]
    porcelain: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full `migrate` phase against `<dir>/schema.fsx`.
    Migrate,
    /// Drain the journal into the new DB until replay catches up.
    Drain,
    /// Flip the new DB to `ready` once drain has completed.
    Cutover,
    /// Print a status snapshot of both DBs.
    Status,
    /// Drop old-DB metadata once it is safe to do so.
    CleanupOld,
    /// Drop old-side markers and delete a non-ready new DB file.
    Reset,
    /// Dry-run preflight report only.
    Plan,
}

fn install_tracing(verbose: bool) {
    let default_floor = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_floor));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_tracing(cli.verbose);

    let dir = cli.dir.clone().unwrap_or_else(|| PathBuf::from("."));

    match run(&cli, &dir) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, dir: &Path) -> migr_core::error::Result<ExitCode> {
    match &cli.command {
        Command::Migrate => run_migrate(dir),
        Command::Drain => run_drain(dir),
        Command::Cutover => run_cutover(dir),
        Command::Status => run_status(dir, cli.porcelain),
        Command::CleanupOld => run_cleanup_old(dir),
        Command::Reset => run_reset(dir),
        Command::Plan => run_plan(dir),
    }
}

fn run_migrate(dir: &Path) -> migr_core::error::Result<ExitCode> {
    let target = paths::load_target_schema(dir)?;
    let target_path = paths::target_db_path(dir, &target)?;

    if target_path.exists() {
        tracing::info!(path = %target_path.display(), "target already exists for this schema; nothing to do");
        return Ok(ExitCode::SUCCESS);
    }

    let source_path = match paths::source_db_path(dir, &target_path) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(error = %e, "no source database found; nothing to migrate");
            return Ok(ExitCode::SUCCESS);
        }
    };

    let outcome = migr_workflow::migrate(
        source_path.to_str().expect("db path is valid UTF-8"),
        target_path.to_str().expect("db path is valid UTF-8"),
        &target,
        None,
    )?;
    println!("migrated {} table(s), schema hash {}", outcome.tables_copied, outcome.schema_hash);
    Ok(ExitCode::SUCCESS)
}

fn run_drain(dir: &Path) -> migr_core::error::Result<ExitCode> {
    let target = paths::load_target_schema(dir)?;
    let target_path = paths::target_db_path(dir, &target)?;
    let source_path = paths::source_db_path(dir, &target_path)?;

    let outcome = migr_workflow::drain(
        source_path.to_str().expect("db path is valid UTF-8"),
        target_path.to_str().expect("db path is valid UTF-8"),
        &target,
    )?;
    println!("replayed {} transaction group(s), drain_completed={}", outcome.groups_replayed, outcome.drain_completed);
    Ok(ExitCode::SUCCESS)
}

fn run_cutover(dir: &Path) -> migr_core::error::Result<ExitCode> {
    let target = paths::load_target_schema(dir)?;
    let target_path = paths::target_db_path(dir, &target)?;
    match migr_workflow::cutover(target_path.to_str().expect("db path is valid UTF-8")) {
        Ok(()) => {
            println!("cutover complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("cutover blocked: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_status(dir: &Path, porcelain: bool) -> migr_core::error::Result<ExitCode> {
    let target_path_opt = paths::load_target_schema(dir).ok().and_then(|target| paths::target_db_path(dir, &target).ok());

    let (old_str, new_str);
    let old_path = match &target_path_opt {
        Some(tp) => paths::source_db_path(dir, tp).ok(),
        None => None,
    };
    old_str = old_path.as_ref().map(|p| p.to_str().expect("db path is valid UTF-8").to_string());
    new_str = target_path_opt.as_ref().map(|p| p.to_str().expect("db path is valid UTF-8").to_string());

    let report = migr_workflow::status(old_str.as_deref(), new_str.as_deref())?;
    if porcelain {
        print!("{}", output::render_porcelain(&report));
    } else {
        print!("{}", output::render_human(&report));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_cleanup_old(dir: &Path) -> migr_core::error::Result<ExitCode> {
    let target = paths::load_target_schema(dir)?;
    let target_path = paths::target_db_path(dir, &target)?;
    let source_path = paths::source_db_path(dir, &target_path)?;
    match migr_workflow::cleanup_old(source_path.to_str().expect("db path is valid UTF-8")) {
        Ok(()) => {
            println!("old-DB metadata dropped");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("cleanup refused: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_reset(dir: &Path) -> migr_core::error::Result<ExitCode> {
    let target = paths::load_target_schema(dir)?;
    let target_path = paths::target_db_path(dir, &target)?;
    let source_path = paths::source_db_path(dir, &target_path).ok();

    let source_str = source_path.as_ref().map(|p| p.to_str().expect("db path is valid UTF-8").to_string());
    match migr_workflow::reset(
        source_str.as_deref().unwrap_or(""),
        Some(target_path.to_str().expect("db path is valid UTF-8")),
    ) {
        Ok(()) => {
            println!("reset complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("reset refused: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_plan(dir: &Path) -> migr_core::error::Result<ExitCode> {
    let target = paths::load_target_schema(dir)?;
    let target_path = paths::target_db_path(dir, &target)?;
    let source_path = paths::source_db_path(dir, &target_path).unwrap_or_default();

    let report = migr_workflow::plan(source_path.to_str().unwrap_or(""), &target)?;
    for s in &report.supported {
        println!("ok:   {s}");
    }
    for u in &report.unsupported {
        println!("FAIL: {u}");
    }
    for w in &report.composite_pk_warnings {
        println!("warn: {w}");
    }
    if report.is_runnable() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
