// src/store.rs
//! Local centralized store layout and run-stamp helpers.
//!
//! Layout under a base directory:
//!   test_data/reports/<stamp>/                    per-host run artifacts
//!   test_data/reports/centralized/<stamp>/raw/    collected per-host files
//!   test_data/reports/centralized/<stamp>/aggregate.json|aggregate.md
//!   test_data/reports/centralized/compare/<b>_vs_<c>.json

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{REPORTS_SUBDIR, STAMP_FORMAT};

/// Render a UTC instant as a run stamp, truncated to the minute.
pub fn stamp_from(instant: DateTime<Utc>) -> String {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
        .format(STAMP_FORMAT)
        .to_string()
}

/// Parse a run stamp back into its UTC instant.
pub fn parse_stamp(stamp: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .with_context(|| format!("'{stamp}' is not a run stamp ({STAMP_FORMAT})"))?;
    Ok(naive.and_utc())
}

/// Path schema for the local store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    pub fn reports_root(&self) -> PathBuf {
        self.root.join(REPORTS_SUBDIR)
    }

    /// Per-host run directory (where a local `run` writes its artifacts).
    pub fn run_dir(&self, stamp: &str) -> PathBuf {
        self.reports_root().join(stamp)
    }

    pub fn centralized_root(&self) -> PathBuf {
        self.reports_root().join("centralized")
    }

    pub fn centralized_dir(&self, stamp: &str) -> PathBuf {
        self.centralized_root().join(stamp)
    }

    /// Where collected per-host files land, keyed by host address.
    pub fn raw_dir(&self, stamp: &str) -> PathBuf {
        self.centralized_dir(stamp).join("raw")
    }

    pub fn aggregate_path(&self, stamp: &str) -> PathBuf {
        self.centralized_dir(stamp).join("aggregate.json")
    }

    pub fn aggregate_md_path(&self, stamp: &str) -> PathBuf {
        self.centralized_dir(stamp).join("aggregate.md")
    }

    pub fn compare_dir(&self) -> PathBuf {
        self.centralized_root().join("compare")
    }

    pub fn compare_path(&self, baseline: &str, current: &str) -> PathBuf {
        self.compare_dir().join(format!("{baseline}_vs_{current}.json"))
    }

    /// Stamps that already have an aggregate snapshot, oldest first.
    pub fn list_aggregates(&self) -> Result<Vec<String>> {
        let root = self.centralized_root();
        let mut stamps = Vec::new();
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(_) => return Ok(stamps),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if parse_stamp(&name).is_ok() && self.aggregate_path(&name).exists() {
                stamps.push(name);
            }
        }
        // Stamp format sorts lexicographically in time order.
        stamps.sort();
        Ok(stamps)
    }
}

/// Write a value as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("serialize JSON")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}
