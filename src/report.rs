// src/report.rs
//! Per-host result records and the structured run artifact.
//!
//! A `ResultRecord` is created once per execution attempt and never mutated
//! afterwards. A populated `error` means the metric fields are absent, not
//! zero. `HostReport` is the report.json artifact the collector later pulls
//! from each host.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::parse::ParsedMetrics;
use crate::scenario::{ScenarioSpec, TestKind};

/// Outcome of running one scenario on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub scenario: String,
    pub kind: TestKind,
    pub block_size: String,
    pub queue_depth: u32,
    pub numjobs: u32,
    pub rwmix_read: u32,
    pub throughput_mbps: Option<f64>,
    pub iops: Option<f64>,
    pub lat_mean_us: Option<f64>,
    pub lat_p99_us: Option<f64>,
    pub duration_secs: f64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn success(
        spec: &ScenarioSpec,
        command: String,
        duration_secs: f64,
        metrics: ParsedMetrics,
    ) -> Self {
        ResultRecord {
            scenario: spec.name(),
            kind: spec.kind,
            block_size: spec.block_size.clone(),
            queue_depth: spec.queue_depth,
            numjobs: spec.numjobs,
            rwmix_read: spec.rwmix_read,
            throughput_mbps: Some(metrics.throughput_mbps),
            iops: Some(metrics.iops),
            lat_mean_us: metrics.lat_mean_us,
            lat_p99_us: metrics.lat_p99_us,
            duration_secs,
            command,
            error: None,
        }
    }

    pub fn failure(
        spec: &ScenarioSpec,
        command: String,
        duration_secs: f64,
        error: String,
    ) -> Self {
        ResultRecord {
            scenario: spec.name(),
            kind: spec.kind,
            block_size: spec.block_size.clone(),
            queue_depth: spec.queue_depth,
            numjobs: spec.numjobs,
            rwmix_read: spec.rwmix_read,
            throughput_mbps: None,
            iops: None,
            lat_mean_us: None,
            lat_p99_us: None,
            duration_secs,
            command,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The structured per-host artifact for one run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReport {
    pub host: String,
    pub run_id: String,
    pub generated_at: String,
    pub results: Vec<ResultRecord>,
}

impl HostReport {
    pub fn new(run_id: &str, results: Vec<ResultRecord>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        HostReport {
            host,
            run_id: run_id.to_string(),
            generated_at: Utc::now().to_rfc3339(),
            results,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize host report")?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
    }
}

fn fmt_opt(v: Option<f64>, prec: usize) -> String {
    match v {
        Some(v) => format!("{v:.prec$}"),
        None => "-".to_string(),
    }
}

/// Human-readable companion rendering of a host report.
pub fn render_markdown(report: &HostReport) -> String {
    let mut out = String::new();
    let ok: Vec<&ResultRecord> = report.results.iter().filter(|r| r.is_ok()).collect();
    let failed: Vec<&ResultRecord> = report.results.iter().filter(|r| !r.is_ok()).collect();

    out.push_str("# Storage performance report\n\n");
    out.push_str(&format!("- Host: {}\n", report.host));
    out.push_str(&format!("- Run: {}\n", report.run_id));
    out.push_str(&format!("- Generated: {}\n", report.generated_at));
    out.push_str(&format!(
        "- Scenarios: {} total, {} ok, {} failed\n\n",
        report.results.len(),
        ok.len(),
        failed.len()
    ));

    let seq: Vec<&&ResultRecord> = ok.iter().filter(|r| r.kind.is_sequential()).collect();
    if !seq.is_empty() {
        out.push_str("## Sequential (dd)\n\n");
        out.push_str("| scenario | block | MB/s | IOPS | secs |\n");
        out.push_str("|---|---|---|---|---|\n");
        for r in &seq {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {:.2} |\n",
                r.scenario,
                r.block_size,
                fmt_opt(r.throughput_mbps, 2),
                fmt_opt(r.iops, 0),
                r.duration_secs
            ));
        }
        out.push('\n');
    }

    let rand: Vec<&&ResultRecord> = ok.iter().filter(|r| !r.kind.is_sequential()).collect();
    if !rand.is_empty() {
        out.push_str("## Random I/O (fio)\n\n");
        out.push_str("| scenario | bs | qd | jobs | r% | IOPS | MB/s | lat µs | p99 µs |\n");
        out.push_str("|---|---|---|---|---|---|---|---|---|\n");
        for r in &rand {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
                r.scenario,
                r.block_size,
                r.queue_depth,
                r.numjobs,
                r.rwmix_read,
                fmt_opt(r.iops, 0),
                fmt_opt(r.throughput_mbps, 2),
                fmt_opt(r.lat_mean_us, 1),
                fmt_opt(r.lat_p99_us, 1),
            ));
        }
        out.push('\n');
    }

    if !failed.is_empty() {
        out.push_str("## Failures\n\n");
        for r in &failed {
            out.push_str(&format!(
                "- {}: {}\n",
                r.scenario,
                r.error.as_deref().unwrap_or("unknown error")
            ));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{generate_matrix, FsKind, MatrixOptions, Mode};

    fn sample_spec() -> ScenarioSpec {
        generate_matrix(Mode::Quick, FsKind::Generic, &MatrixOptions::new(Mode::Quick))
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn error_record_has_no_metrics() {
        let spec = sample_spec();
        let rec = ResultRecord::failure(&spec, "fio ...".into(), 1.0, "timed out".into());
        assert!(!rec.is_ok());
        assert!(rec.iops.is_none());
        assert!(rec.throughput_mbps.is_none());
        assert!(rec.lat_mean_us.is_none());
    }

    #[test]
    fn report_roundtrips_through_json() {
        let spec = sample_spec();
        let rec = ResultRecord::success(
            &spec,
            "fio ...".into(),
            3.2,
            ParsedMetrics {
                throughput_mbps: 120.0,
                iops: 30_000.0,
                lat_mean_us: Some(130.0),
                lat_p99_us: Some(420.0),
            },
        );
        let report = HostReport::new("20260825-1200", vec![rec]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write(&path).unwrap();
        let loaded = HostReport::load(&path).unwrap();
        assert_eq!(loaded.run_id, "20260825-1200");
        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.results[0].iops, Some(30_000.0));
        assert!(loaded.results[0].error.is_none());
    }

    #[test]
    fn markdown_lists_failures() {
        let spec = sample_spec();
        let rec = ResultRecord::failure(&spec, "fio ...".into(), 1.0, "boom".into());
        let report = HostReport::new("20260825-1200", vec![rec]);
        let md = render_markdown(&report);
        assert!(md.contains("## Failures"));
        assert!(md.contains("boom"));
    }
}
