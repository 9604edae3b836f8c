// src/dispatch.rs
//! Time-synchronized fan-out of a benchmark run across the cluster.
//!
//! Every host is armed independently and concurrently with the same
//! wait-until-instant command; there is no central clock authority, only the
//! assumption that each host's wall clock is reasonably close to UTC. One
//! host failing to arm never blocks the others.

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{error, info};

use crate::cluster::ClusterConfig;
use crate::remote::Connector;

/// One host that failed to dispatch or collect, with the reason.
#[derive(Debug, Clone)]
pub struct HostFailure {
    pub host: String,
    pub error: String,
}

/// Per-host dispatch acknowledgements.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub run_id: String,
    pub armed: Vec<String>,
    pub failed: Vec<HostFailure>,
}

impl DispatchReport {
    pub fn all_armed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Build the one-shot remote command: create the run directory, sleep until
/// the target instant by the remote clock, run the entrypoint with the run
/// id appended, log to run.log, detach.
pub fn build_remote_command(
    cfg: &ClusterConfig,
    stamp: &str,
    entry_args: &str,
    sudo: bool,
) -> Result<String> {
    let start = cfg.start_instant()?;
    let start_str = start.format("%Y-%m-%d %H:%M:00");
    let workdir = cfg.remote_workdir.display();
    let run_dir = format!("{}/{}/{}", workdir, crate::constants::REPORTS_SUBDIR, stamp);
    let run_log = format!("{}/{}", run_dir, crate::constants::RUN_LOG);
    let sudo_prefix = if sudo { "sudo " } else { "" };

    Ok(format!(
        "bash -lc 'mkdir -p \"{run_dir}\" && cd \"{workdir}\" && \
         T=$(date -u -d \"{start_str}\" +%s); D=$((T-$(date -u +%s))); \
         if [ \"$D\" -lt 0 ]; then D=0; fi; \
         (sleep $D; {sudo_prefix}./blkbench run {entry_args} --run-id {stamp}) \
         >> \"{run_log}\" 2>&1 &'"
    ))
}

/// Arm every configured host. Channel and auth failures are collected per
/// host; the returned report always covers the full vm list.
pub async fn dispatch(
    cfg: &ClusterConfig,
    entry_args: &str,
    connector: Arc<dyn Connector>,
) -> Result<DispatchReport> {
    let stamp = cfg.run_stamp()?;
    info!(
        "dispatching run {} to {} hosts (start {})",
        stamp,
        cfg.vms.len(),
        cfg.start_time_utc
    );

    let mut tasks = FuturesUnordered::new();
    for vm in &cfg.vms {
        let cmd = build_remote_command(cfg, &stamp, entry_args, cfg.sudo_for(vm))?;
        let vm = vm.clone();
        let connector = connector.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let outcome = connector
                .connect(&vm)
                .and_then(|chan| chan.execute(&cmd).map(|_| ()));
            (vm.host, outcome)
        }));
    }

    let mut report = DispatchReport {
        run_id: stamp,
        ..Default::default()
    };
    while let Some(joined) = tasks.next().await {
        match joined {
            Ok((host, Ok(()))) => {
                info!("armed {host}");
                report.armed.push(host);
            }
            Ok((host, Err(e))) => {
                error!("failed to arm {host}: {e}");
                report.failed.push(HostFailure {
                    host,
                    error: e.to_string(),
                });
            }
            Err(join_err) => {
                error!("dispatch task panicked: {join_err}");
                report.failed.push(HostFailure {
                    host: "<unknown>".into(),
                    error: join_err.to_string(),
                });
            }
        }
    }
    report.armed.sort();
    report.failed.sort_by(|a, b| a.host.cmp(&b.host));
    Ok(report)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector shared by dispatch and collect tests.

    use super::*;
    use crate::remote::{RemoteChannel, RemoteError};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Files and behavior for one fake host.
    #[derive(Default)]
    pub struct FakeHost {
        pub unreachable: bool,
        pub auth_fails: bool,
        /// remote path -> file contents served to download()
        pub files: HashMap<String, String>,
    }

    #[derive(Default)]
    pub struct MockConnector {
        pub hosts: Mutex<HashMap<String, FakeHost>>,
        pub executed: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockConnector {
        pub fn with_hosts(hosts: Vec<(&str, FakeHost)>) -> Arc<Self> {
            Arc::new(MockConnector {
                hosts: Mutex::new(
                    hosts
                        .into_iter()
                        .map(|(h, f)| (h.to_string(), f))
                        .collect(),
                ),
                executed: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    pub struct MockChannel {
        host: String,
        files: HashMap<String, String>,
        executed: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl Connector for MockConnector {
        fn connect(
            &self,
            host: &crate::cluster::HostSpec,
        ) -> Result<Box<dyn RemoteChannel>, RemoteError> {
            let hosts = self.hosts.lock().unwrap();
            let fake = hosts.get(&host.host).ok_or_else(|| RemoteError::Unreachable {
                host: host.host.clone(),
                msg: "unknown host".into(),
            })?;
            if fake.unreachable {
                return Err(RemoteError::Unreachable {
                    host: host.host.clone(),
                    msg: "connection timed out".into(),
                });
            }
            if fake.auth_fails {
                return Err(RemoteError::Auth {
                    host: host.host.clone(),
                    msg: "credentials rejected".into(),
                });
            }
            Ok(Box::new(MockChannel {
                host: host.host.clone(),
                files: fake.files.clone(),
                executed: self.executed.clone(),
            }))
        }
    }

    impl RemoteChannel for MockChannel {
        fn execute(&self, cmd: &str) -> Result<String, RemoteError> {
            self.executed
                .lock()
                .unwrap()
                .push((self.host.clone(), cmd.to_string()));
            Ok(String::new())
        }

        fn download(&self, remote: &Path, local: &Path) -> Result<(), RemoteError> {
            let key = remote.display().to_string();
            let contents = self.files.get(&key).ok_or_else(|| RemoteError::Transfer {
                host: self.host.clone(),
                path: key.clone(),
                msg: "no such file".into(),
            })?;
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            std::fs::write(local, contents).map_err(|e| RemoteError::Transfer {
                host: self.host.clone(),
                path: key,
                msg: e.to_string(),
            })
        }

        fn upload(&self, _local: &Path, _remote: &Path) -> Result<(), RemoteError> {
            Ok(())
        }
    }
}
