// src/main.rs
//! blkbench CLI: run the matrix locally or drive a cluster-wide run.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

use blkbench::cluster::ClusterConfig;
use blkbench::constants::{REPORT_JSON, START_TIME_FORMAT};
use blkbench::remote::SshConnector;
use blkbench::runner::{command_for, ExecutionRunner};
use blkbench::scenario::{
    generate_matrix, sequential_specs, FsKind, MatrixOptions, Mode, ScenarioSpec,
};
use blkbench::sched::{wait_until, SystemClock, WaitOutcome};
use blkbench::store::{self, LocalStore};
use blkbench::{aggregate, collect, compare, dispatch, report};

#[derive(Parser)]
#[command(
    name = "blkbench",
    version,
    about = "Block-storage benchmark matrix: local execution and cluster orchestration"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the benchmark matrix on this host
    Run {
        /// full (480 scenarios) or quick (10-point subset)
        #[arg(long, default_value = "full")]
        mode: String,
        /// Directory the benchmark files are created in
        #[arg(long, default_value = ".")]
        test_dir: PathBuf,
        /// Run identifier; defaults to the current UTC minute
        #[arg(long)]
        run_id: Option<String>,
        /// Wait until this UTC instant before starting ("YYYY-MM-DD HH:MM")
        #[arg(long)]
        start_at: Option<String>,
        /// Filesystem type override; autodetected via df -T when absent
        #[arg(long)]
        fs: Option<String>,
        /// Leave scratch files behind after the run
        #[arg(long)]
        no_cleanup: bool,
    },
    /// Print the commands the matrix would execute, without running them
    Matrix {
        #[arg(long, default_value = "full")]
        mode: String,
        #[arg(long)]
        fs: Option<String>,
    },
    /// Arm every cluster host to start the run at the configured instant
    Dispatch {
        /// Cluster topology JSON
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "full")]
        mode: String,
    },
    /// Pull per-host reports for the configured run into the local store
    Collect {
        #[arg(long)]
        config: PathBuf,
        /// Collect an earlier run instead of the configured one
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Roll collected per-host reports into one cluster snapshot
    Aggregate {
        #[arg(long)]
        config: PathBuf,
        /// Aggregate an earlier run instead of the configured one
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Delta two aggregate snapshots
    Compare {
        #[arg(long)]
        baseline: Option<String>,
        #[arg(long)]
        current: Option<String>,
        /// Compare the two most recent aggregated runs
        #[arg(long)]
        auto: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::new(format!("blkbench={level}")))
        .init();

    match cli.command {
        Commands::Run {
            mode,
            test_dir,
            run_id,
            start_at,
            fs,
            no_cleanup,
        } => run_cmd(&mode, &test_dir, run_id, start_at, fs, no_cleanup).await,
        Commands::Matrix { mode, fs } => matrix_cmd(&mode, fs),
        Commands::Dispatch { config, mode } => dispatch_cmd(&config, &mode).await,
        Commands::Collect { config, run_id } => collect_cmd(&config, run_id).await,
        Commands::Aggregate { config, run_id } => aggregate_cmd(&config, run_id),
        Commands::Compare {
            baseline,
            current,
            auto,
        } => compare_cmd(baseline, current, auto),
    }
}

fn parse_mode(s: &str) -> Result<Mode> {
    Mode::from_str(s).map_err(|e| anyhow::anyhow!(e))
}

fn fs_kind(dir: &Path, over: Option<String>) -> FsKind {
    if let Some(name) = over {
        return FsKind::from_str(&name).unwrap_or(FsKind::Generic);
    }
    detect_fs_kind(dir)
}

/// Ask df for the filesystem type under the test directory.
fn detect_fs_kind(dir: &Path) -> FsKind {
    let output = std::process::Command::new("df").arg("-T").arg(dir).output();
    if let Ok(out) = output {
        if out.status.success() {
            let text = String::from_utf8_lossy(&out.stdout);
            if let Some(fstype) = text.lines().nth(1).and_then(|l| l.split_whitespace().nth(1)) {
                info!("detected filesystem type: {fstype}");
                return FsKind::from_str(fstype).unwrap_or(FsKind::Generic);
            }
        }
    }
    warn!("filesystem type detection failed, assuming generic");
    FsKind::Generic
}

/// All scenarios of one run, sequential dd passes first so the read pass
/// always has its source file.
fn build_specs(mode: Mode, fs: FsKind) -> Vec<ScenarioSpec> {
    let mut specs = sequential_specs(mode, fs);
    specs.extend(generate_matrix(mode, fs, &MatrixOptions::new(mode)));
    specs
}

fn markdown_name(stamp: &str, mode: Mode) -> String {
    match mode {
        Mode::Quick => format!("storage_performance_report_{stamp}-quick.md"),
        Mode::Full => format!("storage_performance_report_{stamp}.md"),
    }
}

async fn run_cmd(
    mode: &str,
    test_dir: &Path,
    run_id: Option<String>,
    start_at: Option<String>,
    fs_override: Option<String>,
    no_cleanup: bool,
) -> Result<()> {
    let mode = parse_mode(mode)?;

    if let Some(at) = &start_at {
        let target = NaiveDateTime::parse_from_str(at, START_TIME_FORMAT)
            .with_context(|| format!("--start-at '{at}' does not match '{START_TIME_FORMAT}'"))?
            .and_utc();
        let cancel = Arc::new(Notify::new());
        let canceller = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            canceller.notify_one();
        });
        info!("waiting until {target} to start");
        if wait_until(&SystemClock, target, &cancel).await == WaitOutcome::Cancelled {
            bail!("interrupted while waiting for the start instant");
        }
    }

    let stamp = match run_id {
        Some(id) => id,
        None => store::stamp_from(Utc::now()),
    };
    std::fs::create_dir_all(test_dir)
        .with_context(|| format!("create test dir {}", test_dir.display()))?;
    let fs = fs_kind(test_dir, fs_override);
    let specs = build_specs(mode, fs);
    info!("run {stamp}: {} scenarios", specs.len());

    let pb = ProgressBar::new(specs.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );

    let runner = ExecutionRunner::new(test_dir);
    let mut results = Vec::with_capacity(specs.len());
    for spec in &specs {
        pb.set_message(spec.name());
        let record = runner.run(spec).await;
        if let Some(err) = &record.error {
            warn!("{}: {err}", spec.name());
        }
        results.push(record);
        pb.inc(1);
    }
    pb.finish_with_message("done");

    if !no_cleanup {
        runner.cleanup_test_files();
    }

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - ok;
    let host_report = report::HostReport::new(&stamp, results);

    let local = LocalStore::new(".");
    let run_dir = local.run_dir(&stamp);
    host_report.write(&run_dir.join(REPORT_JSON))?;
    let md_path = run_dir.join(markdown_name(&stamp, mode));
    std::fs::write(&md_path, report::render_markdown(&host_report))
        .with_context(|| format!("write {}", md_path.display()))?;

    println!(
        "run {stamp}: {ok} ok, {failed} failed, report at {}",
        run_dir.join(REPORT_JSON).display()
    );
    if ok == 0 {
        bail!("every scenario failed");
    }
    Ok(())
}

fn matrix_cmd(mode: &str, fs_override: Option<String>) -> Result<()> {
    let mode = parse_mode(mode)?;
    let fs = match fs_override {
        Some(name) => FsKind::from_str(&name).unwrap_or(FsKind::Generic),
        None => FsKind::Generic,
    };
    for spec in build_specs(mode, fs) {
        println!("{}", command_for(&spec).join(" "));
    }
    Ok(())
}

async fn dispatch_cmd(config: &Path, mode: &str) -> Result<()> {
    parse_mode(mode)?;
    let cfg = ClusterConfig::load(config)?;
    let connector = Arc::new(SshConnector::default());
    let entry_args = format!("--mode {mode}");
    let result = dispatch::dispatch(&cfg, &entry_args, connector).await?;

    for host in &result.armed {
        println!("armed   {host}");
    }
    for failure in &result.failed {
        println!("FAILED  {}: {}", failure.host, failure.error);
    }
    if !result.all_armed() {
        bail!(
            "{} of {} hosts failed to arm for run {}",
            result.failed.len(),
            cfg.vms.len(),
            result.run_id
        );
    }
    println!(
        "run {} armed on {} hosts, starts at {} UTC",
        result.run_id,
        result.armed.len(),
        cfg.start_time_utc
    );
    Ok(())
}

async fn collect_cmd(config: &Path, run_id: Option<String>) -> Result<()> {
    let cfg = ClusterConfig::load(config)?;
    let local = LocalStore::new(".");
    let connector = Arc::new(SshConnector::default());
    let outcome = collect::collect(&cfg, &local, connector, run_id.as_deref()).await?;

    for (host, snap) in &outcome.snapshots {
        println!("collected {host}: {} results", snap.report.results.len());
    }
    for failure in &outcome.failed {
        println!("FAILED    {}: {}", failure.host, failure.error);
    }
    if outcome.snapshots.is_empty() {
        bail!("no host produced a report for run {}", outcome.run_id);
    }
    println!(
        "run {}: {} of {} hosts collected into {}",
        outcome.run_id,
        outcome.hosts_reporting(),
        cfg.vms.len(),
        local.raw_dir(&outcome.run_id).display()
    );
    Ok(())
}

fn aggregate_cmd(config: &Path, run_id: Option<String>) -> Result<()> {
    let cfg = ClusterConfig::load(config)?;
    let stamp = match run_id {
        Some(id) => id,
        None => cfg.run_stamp()?,
    };
    let local = LocalStore::new(".");
    let snapshots = collect::load_collected(&local, &stamp)?;
    let snapshot = aggregate::aggregate(&stamp, cfg.p, &snapshots)?;

    let json_path = local.aggregate_path(&stamp);
    store::write_json(&json_path, &snapshot)?;
    std::fs::write(
        local.aggregate_md_path(&stamp),
        aggregate::render_markdown(&snapshot),
    )
    .context("write aggregate markdown")?;

    println!(
        "run {stamp}: aggregated {} scenarios from {} hosts into {}",
        snapshot.scenarios.len(),
        snapshot.meta.vm_count,
        json_path.display()
    );
    Ok(())
}

fn compare_cmd(baseline: Option<String>, current: Option<String>, auto: bool) -> Result<()> {
    let local = LocalStore::new(".");
    let (baseline, current) = if auto {
        let (b, c) = compare::auto_pick(&local)?;
        info!("auto-picked baseline {b}, current {c}");
        (b, c)
    } else {
        match (baseline, current) {
            (Some(b), Some(c)) => (b, c),
            _ => bail!("pass both --baseline and --current, or --auto"),
        }
    };

    let base: aggregate::AggregateSnapshot = store::read_json(&local.aggregate_path(&baseline))?;
    let curr: aggregate::AggregateSnapshot = store::read_json(&local.aggregate_path(&current))?;
    let result = compare::compare(&base, &curr)?;

    let out_path = local.compare_path(&baseline, &current);
    store::write_json(&out_path, &result)?;

    let mut improved = 0;
    let mut declined = 0;
    let mut flat = 0;
    for delta in result.scenarios.values() {
        match delta.iops.trend {
            compare::Trend::Improved => improved += 1,
            compare::Trend::Declined => declined += 1,
            compare::Trend::Flat => flat += 1,
        }
    }
    println!(
        "{baseline} -> {current}: {improved} improved, {declined} declined, {flat} flat \
         ({} added, {} removed), details at {}",
        result.added.len(),
        result.removed.len(),
        out_path.display()
    );
    Ok(())
}
