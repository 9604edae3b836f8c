// src/cluster.rs
//! Cluster topology configuration.
//!
//! Loaded once per invocation from JSON, validated up front, then passed
//! immutably into dispatch/collect/aggregate/compare. There is no ambient
//! global configuration.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::START_TIME_FORMAT;
use crate::store;

/// Credential kind for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Key,
    Password,
}

/// Auth descriptor: a private-key path or a password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSpec {
    #[serde(rename = "type")]
    pub kind: AuthKind,
    pub value: String,
}

/// One remote host slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    pub host: String,
    pub user: String,
    pub auth: AuthSpec,
    /// Per-host privilege-elevation override; falls back to the cluster flag.
    #[serde(default)]
    pub sudo: Option<bool>,
}

/// Cluster configuration, the external interface of the multi-host pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Operator-declared physical-machine count. Not measured; used as the
    /// comparability key between aggregate snapshots.
    pub p: u32,
    /// Target UTC start instant, minute precision: "YYYY-MM-DD HH:MM".
    pub start_time_utc: String,
    #[serde(default = "default_remote_workdir")]
    pub remote_workdir: PathBuf,
    #[serde(default)]
    pub sudo: bool,
    pub vms: Vec<HostSpec>,
}

fn default_remote_workdir() -> PathBuf {
    PathBuf::from("/data/blkbench")
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read cluster config {}", path.display()))?;
        let cfg: ClusterConfig = serde_json::from_str(&text)
            .with_context(|| format!("parse cluster config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail closed on anything malformed before any remote action happens.
    pub fn validate(&self) -> Result<()> {
        if self.p == 0 {
            bail!("cluster config: p must be at least 1");
        }
        if self.vms.is_empty() {
            bail!("cluster config: vms list is empty");
        }
        for vm in &self.vms {
            if vm.host.trim().is_empty() {
                bail!("cluster config: vm with empty host address");
            }
            if vm.user.trim().is_empty() {
                bail!("cluster config: vm {} has empty user", vm.host);
            }
            if vm.auth.value.trim().is_empty() {
                bail!("cluster config: vm {} has empty auth value", vm.host);
            }
        }
        self.start_instant()
            .context("cluster config: bad start_time_utc")?;
        Ok(())
    }

    /// The target start instant, minute precision, UTC.
    pub fn start_instant(&self) -> Result<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(&self.start_time_utc, START_TIME_FORMAT)
            .with_context(|| {
                format!(
                    "start_time_utc '{}' does not match '{}'",
                    self.start_time_utc, START_TIME_FORMAT
                )
            })?;
        Ok(naive.and_utc())
    }

    /// Run identifier derived from the start instant.
    pub fn run_stamp(&self) -> Result<String> {
        Ok(store::stamp_from(self.start_instant()?))
    }

    /// Effective sudo flag for one host.
    pub fn sudo_for(&self, vm: &HostSpec) -> bool {
        vm.sudo.unwrap_or(self.sudo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        r#"{
            "p": 3,
            "start_time_utc": "2026-08-25 14:30",
            "remote_workdir": "/data/blkbench",
            "sudo": true,
            "vms": [
                {"host": "10.0.0.1", "user": "root", "auth": {"type": "key", "value": "~/.ssh/id_rsa"}},
                {"host": "10.0.0.2", "user": "bench", "auth": {"type": "password", "value": "s3cret"}, "sudo": false}
            ]
        }"#
        .to_string()
    }

    #[test]
    fn loads_and_validates_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, sample_json()).unwrap();

        let cfg = ClusterConfig::load(&path).unwrap();
        assert_eq!(cfg.p, 3);
        assert_eq!(cfg.vms.len(), 2);
        assert_eq!(cfg.run_stamp().unwrap(), "20260825-1430");
        assert_eq!(cfg.vms[0].auth.kind, AuthKind::Key);
        assert_eq!(cfg.vms[1].auth.kind, AuthKind::Password);
    }

    #[test]
    fn sudo_override_per_host() {
        let cfg: ClusterConfig = serde_json::from_str(&sample_json()).unwrap();
        assert!(cfg.sudo_for(&cfg.vms[0]));
        assert!(!cfg.sudo_for(&cfg.vms[1]));
    }

    #[test]
    fn rejects_unknown_auth_type() {
        let bad = sample_json().replace("\"key\"", "\"kerberos\"");
        assert!(serde_json::from_str::<ClusterConfig>(&bad).is_err());
    }

    #[test]
    fn rejects_bad_start_time_and_empty_vms() {
        let mut cfg: ClusterConfig = serde_json::from_str(&sample_json()).unwrap();
        cfg.start_time_utc = "not a time".into();
        assert!(cfg.validate().is_err());

        let mut cfg: ClusterConfig = serde_json::from_str(&sample_json()).unwrap();
        cfg.vms.clear();
        assert!(cfg.validate().is_err());

        let mut cfg: ClusterConfig = serde_json::from_str(&sample_json()).unwrap();
        cfg.p = 0;
        assert!(cfg.validate().is_err());
    }
}
