// src/collect.rs
//! Pull per-host run artifacts into the centralized store.
//!
//! The structured report.json is mandatory per host; its absence marks the
//! host failed. The human-readable markdown is best effort and only logged
//! when missing. Collection never aborts the batch on a single bad host.

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cluster::ClusterConfig;
use crate::constants::{REPORTS_SUBDIR, REPORT_JSON};
use crate::dispatch::HostFailure;
use crate::remote::Connector;
use crate::report::HostReport;
use crate::store::LocalStore;

/// Everything collected from one host for one run.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub host: String,
    pub report: HostReport,
}

/// Collection outcome across the whole cluster, keyed by host address.
#[derive(Debug, Default)]
pub struct CollectOutcome {
    pub run_id: String,
    pub snapshots: BTreeMap<String, RunSnapshot>,
    pub failed: Vec<HostFailure>,
}

impl CollectOutcome {
    pub fn hosts_reporting(&self) -> u32 {
        self.snapshots.len() as u32
    }
}

/// Markdown report names the runner may have produced, most specific first.
fn markdown_candidates(stamp: &str) -> [String; 2] {
    [
        format!("storage_performance_report_{stamp}-quick.md"),
        format!("storage_performance_report_{stamp}.md"),
    ]
}

fn remote_run_dir(cfg: &ClusterConfig, stamp: &str) -> PathBuf {
    cfg.remote_workdir.join(REPORTS_SUBDIR).join(stamp)
}

/// Fetch report.json (required) and the markdown companion (optional) from
/// every host into `raw/<host>.json` and `raw/<host>.md`. `run_id` selects
/// an earlier run; the configured start instant is the default.
pub async fn collect(
    cfg: &ClusterConfig,
    store: &LocalStore,
    connector: Arc<dyn Connector>,
    run_id: Option<&str>,
) -> Result<CollectOutcome> {
    let stamp = match run_id {
        Some(id) => id.to_string(),
        None => cfg.run_stamp()?,
    };
    let raw_dir = store.raw_dir(&stamp);
    std::fs::create_dir_all(&raw_dir)
        .with_context(|| format!("create {}", raw_dir.display()))?;
    info!("collecting run {} from {} hosts", stamp, cfg.vms.len());

    let remote_dir = remote_run_dir(cfg, &stamp);
    let mut tasks = FuturesUnordered::new();
    for vm in &cfg.vms {
        let vm = vm.clone();
        let connector = connector.clone();
        let remote_dir = remote_dir.clone();
        let raw_dir = raw_dir.clone();
        let stamp = stamp.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let outcome = fetch_one(&vm, &connector, &remote_dir, &raw_dir, &stamp);
            (vm.host, outcome)
        }));
    }

    let mut outcome = CollectOutcome {
        run_id: stamp.clone(),
        ..Default::default()
    };
    while let Some(joined) = tasks.next().await {
        match joined {
            Ok((host, Ok(report))) => {
                info!("collected {} results from {host}", report.results.len());
                outcome
                    .snapshots
                    .insert(host.clone(), RunSnapshot { host, report });
            }
            Ok((host, Err(e))) => {
                warn!("collection from {host} failed: {e:#}");
                outcome.failed.push(HostFailure {
                    host,
                    error: format!("{e:#}"),
                });
            }
            Err(join_err) => {
                outcome.failed.push(HostFailure {
                    host: "<unknown>".into(),
                    error: join_err.to_string(),
                });
            }
        }
    }
    outcome.failed.sort_by(|a, b| a.host.cmp(&b.host));
    Ok(outcome)
}

fn fetch_one(
    vm: &crate::cluster::HostSpec,
    connector: &Arc<dyn Connector>,
    remote_dir: &std::path::Path,
    raw_dir: &std::path::Path,
    stamp: &str,
) -> Result<HostReport> {
    let chan = connector.connect(vm)?;

    let local_json = raw_dir.join(format!("{}.json", vm.host));
    chan.download(&remote_dir.join(REPORT_JSON), &local_json)
        .with_context(|| format!("{}: report.json missing or unreadable", vm.host))?;
    let report = HostReport::load(&local_json)?;

    let local_md = raw_dir.join(format!("{}.md", vm.host));
    let mut got_md = false;
    for candidate in markdown_candidates(stamp) {
        if chan.download(&remote_dir.join(&candidate), &local_md).is_ok() {
            got_md = true;
            break;
        }
    }
    if !got_md {
        warn!("{}: no markdown report for run {stamp}", vm.host);
    }

    Ok(report)
}

/// Re-read previously collected reports from the raw directory, for
/// aggregation of a run collected earlier.
pub fn load_collected(store: &LocalStore, stamp: &str) -> Result<BTreeMap<String, RunSnapshot>> {
    let raw_dir = store.raw_dir(stamp);
    let mut snapshots = BTreeMap::new();
    let entries = std::fs::read_dir(&raw_dir)
        .with_context(|| format!("no collected data at {}", raw_dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let host = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let report = HostReport::load(&path)?;
        snapshots.insert(host.clone(), RunSnapshot { host, report });
    }
    if snapshots.is_empty() {
        bail!("no host reports under {}", raw_dir.display());
    }
    Ok(snapshots)
}
