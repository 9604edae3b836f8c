// src/aggregate.rs
//! Cluster-level rollup of collected per-host reports.
//!
//! Totals (IOPS, throughput) are summed across hosts; latencies are averaged
//! over only the hosts that reported the metric. Failed records never
//! contribute. The operator-declared machine count `p` is carried alongside
//! the measured `vm_count` so a topology mismatch is visible downstream.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::collect::RunSnapshot;
use crate::report::ResultRecord;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("run {0}: no successful results to aggregate")]
    NoData(String),
}

/// Provenance of an aggregate snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMeta {
    pub run_id: String,
    /// Declared physical-machine count from the cluster config.
    pub p: u32,
    /// Hosts that actually contributed data.
    pub vm_count: u32,
    pub sources: Vec<String>,
    pub generated_at: String,
}

/// Cluster-wide numbers for one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAggregate {
    pub iops: f64,
    pub throughput_mbps: f64,
    pub lat_mean_us: Option<f64>,
    pub lat_p99_us: Option<f64>,
    /// Hosts that contributed a successful record for this scenario.
    pub sources: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub meta: AggregateMeta,
    pub scenarios: BTreeMap<String, ScenarioAggregate>,
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Roll the collected snapshots up into one cluster snapshot.
pub fn aggregate(
    run_id: &str,
    p: u32,
    snapshots: &BTreeMap<String, RunSnapshot>,
) -> Result<AggregateSnapshot, AggregateError> {
    let mut by_scenario: BTreeMap<String, Vec<&ResultRecord>> = BTreeMap::new();
    for snap in snapshots.values() {
        for rec in &snap.report.results {
            if rec.is_ok() {
                by_scenario.entry(rec.scenario.clone()).or_default().push(rec);
            } else {
                warn!(
                    "{}: dropping failed record {} ({})",
                    snap.host,
                    rec.scenario,
                    rec.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    let mut scenarios = BTreeMap::new();
    for (name, recs) in by_scenario {
        let iops: f64 = recs.iter().filter_map(|r| r.iops).sum();
        let throughput: f64 = recs.iter().filter_map(|r| r.throughput_mbps).sum();
        let lat_mean: Vec<f64> = recs.iter().filter_map(|r| r.lat_mean_us).collect();
        let lat_p99: Vec<f64> = recs.iter().filter_map(|r| r.lat_p99_us).collect();
        scenarios.insert(
            name,
            ScenarioAggregate {
                iops,
                throughput_mbps: throughput,
                lat_mean_us: mean_of(&lat_mean),
                lat_p99_us: mean_of(&lat_p99),
                sources: recs.len() as u32,
            },
        );
    }

    if scenarios.is_empty() {
        return Err(AggregateError::NoData(run_id.to_string()));
    }

    let vm_count = snapshots.len() as u32;
    if vm_count != p {
        warn!("run {run_id}: {vm_count} hosts reported but p={p} declared");
    }

    Ok(AggregateSnapshot {
        meta: AggregateMeta {
            run_id: run_id.to_string(),
            p,
            vm_count,
            sources: snapshots.keys().cloned().collect(),
            generated_at: Utc::now().to_rfc3339(),
        },
        scenarios,
    })
}

fn fmt_opt(v: Option<f64>, prec: usize) -> String {
    match v {
        Some(v) => format!("{v:.prec$}"),
        None => "-".to_string(),
    }
}

/// Human-readable companion for aggregate.json.
pub fn render_markdown(snapshot: &AggregateSnapshot) -> String {
    let meta = &snapshot.meta;
    let mut out = String::new();
    out.push_str("# Cluster aggregate\n\n");
    out.push_str(&format!("- Run: {}\n", meta.run_id));
    out.push_str(&format!("- Machines declared (p): {}\n", meta.p));
    out.push_str(&format!(
        "- Hosts reporting: {} ({})\n",
        meta.vm_count,
        meta.sources.join(", ")
    ));
    out.push_str(&format!("- Generated: {}\n\n", meta.generated_at));

    out.push_str("| scenario | IOPS | MB/s | lat µs | p99 µs | hosts |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for (name, agg) in &snapshot.scenarios {
        out.push_str(&format!(
            "| {} | {:.0} | {:.2} | {} | {} | {} |\n",
            name,
            agg.iops,
            agg.throughput_mbps,
            fmt_opt(agg.lat_mean_us, 1),
            fmt_opt(agg.lat_p99_us, 1),
            agg.sources
        ));
    }
    out.push('\n');
    out
}
