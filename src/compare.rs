// src/compare.rs
//! Delta two aggregate snapshots of the same cluster topology.
//!
//! Comparisons are only meaningful at equal declared machine count; a `p`
//! mismatch is a hard error, not a warning. Throughput and IOPS improve
//! upward, latencies improve downward. Changes within the flat band are
//! reported as `Flat`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::aggregate::AggregateSnapshot;
use crate::constants::FLAT_PCT;
use crate::store::LocalStore;

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("aggregates are not comparable: baseline p={0}, current p={1}")]
    TopologyMismatch(u32, u32),
    #[error("need at least two aggregated runs to compare, found {0}")]
    NotEnoughRuns(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improved,
    Declined,
    Flat,
}

/// Direction in which a larger value is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

/// One metric's movement between the two runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDelta {
    pub baseline: f64,
    pub current: f64,
    pub delta: f64,
    /// Percent change relative to the baseline; absent when the baseline
    /// is zero.
    pub pct: Option<f64>,
    pub trend: Trend,
}

impl MetricDelta {
    fn new(baseline: f64, current: f64, polarity: Polarity) -> Self {
        let delta = current - baseline;
        let pct = if baseline == 0.0 {
            None
        } else {
            Some(delta / baseline * 100.0)
        };
        let trend = match pct {
            Some(p) if p.abs() <= FLAT_PCT => Trend::Flat,
            Some(p) => {
                let up = p > 0.0;
                match polarity {
                    Polarity::HigherIsBetter if up => Trend::Improved,
                    Polarity::HigherIsBetter => Trend::Declined,
                    Polarity::LowerIsBetter if up => Trend::Declined,
                    Polarity::LowerIsBetter => Trend::Improved,
                }
            }
            None if delta == 0.0 => Trend::Flat,
            None => match polarity {
                Polarity::HigherIsBetter => Trend::Improved,
                Polarity::LowerIsBetter => Trend::Declined,
            },
        };
        MetricDelta {
            baseline,
            current,
            delta,
            pct,
            trend,
        }
    }
}

/// Per-scenario movement between two runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDelta {
    pub iops: MetricDelta,
    pub throughput_mbps: MetricDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_mean_us: Option<MetricDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_p99_us: Option<MetricDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResult {
    pub baseline: String,
    pub current: String,
    pub p: u32,
    pub scenarios: BTreeMap<String, ScenarioDelta>,
    /// Scenarios present only in the current run.
    pub added: Vec<String>,
    /// Scenarios present only in the baseline run.
    pub removed: Vec<String>,
}

/// Compare two snapshots scenario by scenario.
pub fn compare(
    baseline: &AggregateSnapshot,
    current: &AggregateSnapshot,
) -> Result<CompareResult, CompareError> {
    if baseline.meta.p != current.meta.p {
        return Err(CompareError::TopologyMismatch(
            baseline.meta.p,
            current.meta.p,
        ));
    }

    let mut scenarios = BTreeMap::new();
    let mut removed = Vec::new();
    for (name, b) in &baseline.scenarios {
        let Some(c) = current.scenarios.get(name) else {
            removed.push(name.clone());
            continue;
        };
        let lat_mean = match (b.lat_mean_us, c.lat_mean_us) {
            (Some(bv), Some(cv)) => Some(MetricDelta::new(bv, cv, Polarity::LowerIsBetter)),
            _ => None,
        };
        let lat_p99 = match (b.lat_p99_us, c.lat_p99_us) {
            (Some(bv), Some(cv)) => Some(MetricDelta::new(bv, cv, Polarity::LowerIsBetter)),
            _ => None,
        };
        scenarios.insert(
            name.clone(),
            ScenarioDelta {
                iops: MetricDelta::new(b.iops, c.iops, Polarity::HigherIsBetter),
                throughput_mbps: MetricDelta::new(
                    b.throughput_mbps,
                    c.throughput_mbps,
                    Polarity::HigherIsBetter,
                ),
                lat_mean_us: lat_mean,
                lat_p99_us: lat_p99,
            },
        );
    }
    let added: Vec<String> = current
        .scenarios
        .keys()
        .filter(|k| !baseline.scenarios.contains_key(*k))
        .cloned()
        .collect();

    Ok(CompareResult {
        baseline: baseline.meta.run_id.clone(),
        current: current.meta.run_id.clone(),
        p: baseline.meta.p,
        scenarios,
        added,
        removed,
    })
}

/// Pick the two most recent aggregated runs: the newest as current, the one
/// before it as baseline.
pub fn auto_pick(store: &LocalStore) -> Result<(String, String), CompareError> {
    let stamps = store
        .list_aggregates()
        .map_err(|_| CompareError::NotEnoughRuns(0))?;
    if stamps.len() < 2 {
        return Err(CompareError::NotEnoughRuns(stamps.len()));
    }
    let current = stamps[stamps.len() - 1].clone();
    let baseline = stamps[stamps.len() - 2].clone();
    Ok((baseline, current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateMeta, ScenarioAggregate};

    fn snapshot(run_id: &str, p: u32, scenarios: Vec<(&str, f64, f64, Option<f64>)>) -> AggregateSnapshot {
        AggregateSnapshot {
            meta: AggregateMeta {
                run_id: run_id.to_string(),
                p,
                vm_count: p,
                sources: vec!["a".into()],
                generated_at: "2026-08-25T15:00:00Z".into(),
            },
            scenarios: scenarios
                .into_iter()
                .map(|(name, iops, mbps, lat)| {
                    (
                        name.to_string(),
                        ScenarioAggregate {
                            iops,
                            throughput_mbps: mbps,
                            lat_mean_us: lat,
                            lat_p99_us: None,
                            sources: p,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn topology_mismatch_is_fatal() {
        let b = snapshot("20260824-0900", 2, vec![("s", 100.0, 10.0, None)]);
        let c = snapshot("20260825-0900", 3, vec![("s", 100.0, 10.0, None)]);
        assert!(matches!(
            compare(&b, &c),
            Err(CompareError::TopologyMismatch(2, 3))
        ));
    }

    #[test]
    fn throughput_up_improves_latency_up_declines() {
        let b = snapshot("b", 2, vec![("s", 100.0, 10.0, Some(100.0))]);
        let c = snapshot("c", 2, vec![("s", 150.0, 15.0, Some(150.0))]);
        let result = compare(&b, &c).unwrap();
        let d = &result.scenarios["s"];
        assert_eq!(d.iops.trend, Trend::Improved);
        assert_eq!(d.iops.pct, Some(50.0));
        assert_eq!(d.lat_mean_us.as_ref().unwrap().trend, Trend::Declined);
    }

    #[test]
    fn latency_down_improves() {
        let b = snapshot("b", 2, vec![("s", 100.0, 10.0, Some(200.0))]);
        let c = snapshot("c", 2, vec![("s", 100.0, 10.0, Some(100.0))]);
        let result = compare(&b, &c).unwrap();
        let d = &result.scenarios["s"];
        assert_eq!(d.iops.trend, Trend::Flat);
        assert_eq!(d.lat_mean_us.as_ref().unwrap().trend, Trend::Improved);
    }

    #[test]
    fn small_moves_are_flat() {
        let b = snapshot("b", 2, vec![("s", 1000.0, 10.0, None)]);
        let c = snapshot("c", 2, vec![("s", 1005.0, 10.05, None)]);
        let result = compare(&b, &c).unwrap();
        let d = &result.scenarios["s"];
        assert_eq!(d.iops.trend, Trend::Flat);
        assert_eq!(d.throughput_mbps.trend, Trend::Flat);
    }

    #[test]
    fn zero_baseline_has_no_pct() {
        let b = snapshot("b", 2, vec![("s", 0.0, 0.0, None)]);
        let c = snapshot("c", 2, vec![("s", 100.0, 10.0, None)]);
        let result = compare(&b, &c).unwrap();
        let d = &result.scenarios["s"];
        assert_eq!(d.iops.pct, None);
        assert_eq!(d.iops.trend, Trend::Improved);
    }

    #[test]
    fn added_and_removed_scenarios_are_listed() {
        let b = snapshot("b", 2, vec![("old", 1.0, 1.0, None), ("both", 1.0, 1.0, None)]);
        let c = snapshot("c", 2, vec![("new", 1.0, 1.0, None), ("both", 1.0, 1.0, None)]);
        let result = compare(&b, &c).unwrap();
        assert_eq!(result.added, vec!["new"]);
        assert_eq!(result.removed, vec!["old"]);
        assert_eq!(result.scenarios.len(), 1);
    }

    #[test]
    fn trend_labels_use_the_artifact_vocabulary() {
        assert_eq!(serde_json::to_string(&Trend::Improved).unwrap(), "\"improved\"");
        assert_eq!(serde_json::to_string(&Trend::Declined).unwrap(), "\"declined\"");
        assert_eq!(serde_json::to_string(&Trend::Flat).unwrap(), "\"flat\"");

        let b = snapshot("b", 2, vec![("s", 100.0, 10.0, None)]);
        let c = snapshot("c", 2, vec![("s", 50.0, 5.0, None)]);
        let json = serde_json::to_string(&compare(&b, &c).unwrap()).unwrap();
        assert!(json.contains("\"declined\""), "{json}");
        assert!(!json.contains("regressed"), "{json}");
    }

    #[test]
    fn auto_pick_takes_last_two_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(
            auto_pick(&store),
            Err(CompareError::NotEnoughRuns(0))
        ));

        for stamp in ["20260823-0900", "20260824-0900", "20260825-0900"] {
            std::fs::create_dir_all(store.centralized_dir(stamp)).unwrap();
            std::fs::write(store.aggregate_path(stamp), "{}").unwrap();
        }
        let (baseline, current) = auto_pick(&store).unwrap();
        assert_eq!(baseline, "20260824-0900");
        assert_eq!(current, "20260825-0900");
    }
}
