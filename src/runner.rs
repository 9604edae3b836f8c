// src/runner.rs
//! Executes one scenario at a time against the local storage target.
//!
//! Scenarios within a host run are strictly sequential: two benchmarks
//! contending for the same device would skew each other's numbers. A timed
//! out process is killed, its record carries the timeout error, and the run
//! moves on. Timed scenarios are never retried.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::parse::{self, RawOutput};
use crate::report::ResultRecord;
use crate::scenario::{parse_size, ScenarioSpec, TestKind};

/// Prefix for fio scratch files, used by cleanup.
pub const FIO_FILE_PREFIX: &str = "fio-test-";
/// Prefix for dd scratch files, used by cleanup.
pub const SEQ_FILE_PREFIX: &str = "seq-test-";

/// What one bounded external invocation came back with.
enum CmdOutcome {
    Finished { raw: RawOutput, success: bool },
    TimedOut,
    SpawnFailed(String),
}

pub struct ExecutionRunner {
    test_dir: PathBuf,
}

impl ExecutionRunner {
    pub fn new(test_dir: impl Into<PathBuf>) -> Self {
        ExecutionRunner {
            test_dir: test_dir.into(),
        }
    }

    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    /// Run one scenario to completion and produce its record. Never panics
    /// and never retries; every failure mode lands in the record's error.
    pub async fn run(&self, spec: &ScenarioSpec) -> ResultRecord {
        let argv = command_for(spec);
        let command = argv.join(" ");
        debug!(scenario = %spec.name(), %command, "executing");

        if spec.kind == TestKind::SeqRead {
            let source = self.test_dir.join(seq_file_name(&spec.block_size));
            if !source.exists() {
                return ResultRecord::failure(
                    spec,
                    command,
                    0.0,
                    format!("sequential read source missing: {}", source.display()),
                );
            }
        }

        let json_path = if spec.kind.is_sequential() {
            None
        } else {
            Some(self.test_dir.join(fio_json_name(spec)))
        };

        let started = Instant::now();
        let outcome = self
            .run_command(&argv, spec.timeout(), json_path.as_deref())
            .await;
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            CmdOutcome::TimedOut => ResultRecord::failure(
                spec,
                command,
                duration,
                format!("timed out after {}s", spec.timeout_secs),
            ),
            CmdOutcome::SpawnFailed(msg) => ResultRecord::failure(spec, command, duration, msg),
            CmdOutcome::Finished { raw, success } => {
                if !success {
                    let stderr = raw.stderr.trim();
                    let msg = if stderr.is_empty() {
                        "benchmark command exited with failure".to_string()
                    } else {
                        stderr.to_string()
                    };
                    return ResultRecord::failure(spec, command, duration, msg);
                }
                let parsed = if spec.kind.is_sequential() {
                    let bs = parse_size(&spec.block_size).unwrap_or(0);
                    parse::parse_sequential(&raw, bs)
                } else {
                    parse::parse_random(&raw)
                };
                match parsed {
                    Ok(metrics) => ResultRecord::success(spec, command, duration, metrics),
                    Err(miss) => ResultRecord::failure(
                        spec,
                        command,
                        duration,
                        format!("result parse failed: {miss}"),
                    ),
                }
            }
        }
    }

    /// Spawn `argv` in the test directory with a wall-clock bound. On
    /// timeout the child is killed via kill_on_drop, not left running.
    async fn run_command(
        &self,
        argv: &[String],
        timeout: std::time::Duration,
        json_path: Option<&Path>,
    ) -> CmdOutcome {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.test_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CmdOutcome::SpawnFailed(format!("spawn {} failed: {e}", argv[0])),
        };

        // Dropping the output future on timeout drops the child handle,
        // which kills the process group member (kill_on_drop).
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => CmdOutcome::TimedOut,
            Ok(Err(e)) => CmdOutcome::SpawnFailed(format!("wait for {} failed: {e}", argv[0])),
            Ok(Ok(output)) => {
                let json = match json_path {
                    Some(path) => std::fs::read_to_string(path).ok(),
                    None => None,
                };
                CmdOutcome::Finished {
                    raw: RawOutput {
                        json,
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    },
                    success: output.status.success(),
                }
            }
        }
    }

    /// Remove the scratch files the external tools leave behind.
    pub fn cleanup_test_files(&self) {
        let Ok(entries) = std::fs::read_dir(&self.test_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(FIO_FILE_PREFIX)
                || name.starts_with(SEQ_FILE_PREFIX)
                || name.starts_with("fio-out-")
            {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!("failed to remove {}: {e}", entry.path().display());
                }
            }
        }
    }
}

fn fio_file_name(spec: &ScenarioSpec) -> String {
    format!(
        "{}{}_{}_{}_{}",
        FIO_FILE_PREFIX, spec.block_size, spec.queue_depth, spec.numjobs, spec.rwmix_read
    )
}

fn fio_json_name(spec: &ScenarioSpec) -> String {
    format!("fio-out-{}.json", spec.name())
}

fn seq_file_name(block_size: &str) -> String {
    format!("{SEQ_FILE_PREFIX}{block_size}")
}

/// Build the external command line for a scenario. Paths are relative to the
/// test directory the runner executes in.
pub fn command_for(spec: &ScenarioSpec) -> Vec<String> {
    if spec.kind.is_sequential() {
        dd_command(spec)
    } else {
        fio_command(spec)
    }
}

fn fio_command(spec: &ScenarioSpec) -> Vec<String> {
    let mut argv = vec![
        "fio".to_string(),
        format!("--name={}", spec.name()),
        format!("--filename={}", fio_file_name(spec)),
        format!("--rw={}", spec.kind.fio_rw()),
        format!("--bs={}", spec.block_size),
        format!("--iodepth={}", spec.queue_depth),
        format!("--numjobs={}", spec.numjobs),
        format!("--runtime={}", spec.runtime_secs),
        "--time_based".to_string(),
        format!("--direct={}", u8::from(spec.direct)),
        format!("--ioengine={}", spec.engine.as_str()),
        "--group_reporting".to_string(),
        "--output-format=json".to_string(),
        format!("--output={}", fio_json_name(spec)),
        format!("--size={}", spec.file_size),
    ];
    if spec.kind == TestKind::RandRw {
        argv.push(format!("--rwmixread={}", spec.rwmix_read));
    }
    argv
}

fn dd_command(spec: &ScenarioSpec) -> Vec<String> {
    let bs = parse_size(&spec.block_size).unwrap_or(4096);
    let total = parse_size(&spec.file_size).unwrap_or(1 << 30);
    let count = (total / bs).max(1);
    let file = seq_file_name(&spec.block_size);

    match spec.kind {
        TestKind::SeqWrite => {
            let mut argv = vec![
                "dd".to_string(),
                "if=/dev/zero".to_string(),
                format!("of={file}"),
                format!("bs={}", spec.block_size),
                format!("count={count}"),
            ];
            if spec.direct {
                argv.push("oflag=direct".to_string());
            } else {
                // Without direct I/O, force data to media so the rate is real.
                argv.push("conv=fdatasync".to_string());
            }
            argv
        }
        TestKind::SeqRead => {
            let mut argv = vec![
                "dd".to_string(),
                format!("if={file}"),
                "of=/dev/null".to_string(),
                format!("bs={}", spec.block_size),
                format!("count={count}"),
            ];
            if spec.direct {
                argv.push("iflag=direct".to_string());
            }
            argv
        }
        _ => unreachable!("dd_command called for random kind"),
    }
}
