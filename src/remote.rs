// src/remote.rs
//! Remote command channel capability.
//!
//! Dispatch and collection depend only on the `Connector`/`RemoteChannel`
//! traits; the production implementation speaks SSH via libssh2 with either
//! key-file or password credentials. Tests substitute an in-memory connector.

use ssh2::Session;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{AuthKind, HostSpec};
use crate::constants::{SSH_CONNECT_TIMEOUT, SSH_PORT};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{host}: unreachable: {msg}")]
    Unreachable { host: String, msg: String },
    #[error("{host}: authentication failed: {msg}")]
    Auth { host: String, msg: String },
    #[error("{host}: remote command failed (exit {status}): {stderr}")]
    Exec {
        host: String,
        status: i32,
        stderr: String,
    },
    #[error("{host}: transfer of {path} failed: {msg}")]
    Transfer {
        host: String,
        path: String,
        msg: String,
    },
}

/// One authenticated session to one host.
pub trait RemoteChannel: Send {
    /// Run a command to completion; nonzero exit is an error.
    fn execute(&self, cmd: &str) -> Result<String, RemoteError>;

    /// Pull a remote file to a local path.
    fn download(&self, remote: &Path, local: &Path) -> Result<(), RemoteError>;

    /// Push a local file to a remote path.
    fn upload(&self, local: &Path, remote: &Path) -> Result<(), RemoteError>;
}

/// Opens channels from host specs. The only seam dispatch/collect see.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &HostSpec) -> Result<Box<dyn RemoteChannel>, RemoteError>;
}

/// Production connector: SSH with the credential the host spec carries.
#[derive(Debug, Clone)]
pub struct SshConnector {
    pub connect_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        SshConnector {
            connect_timeout: SSH_CONNECT_TIMEOUT,
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, host: &HostSpec) -> Result<Box<dyn RemoteChannel>, RemoteError> {
        Ok(Box::new(SshChannel::connect(host, self.connect_timeout)?))
    }
}

pub struct SshChannel {
    session: Session,
    host: String,
}

impl SshChannel {
    pub fn connect(spec: &HostSpec, timeout: Duration) -> Result<Self, RemoteError> {
        let addr = if spec.host.contains(':') {
            spec.host.clone()
        } else {
            format!("{}:{}", spec.host, SSH_PORT)
        };

        let unreachable = |msg: String| RemoteError::Unreachable {
            host: spec.host.clone(),
            msg,
        };

        let sock_addr = addr
            .to_socket_addrs()
            .map_err(|e| unreachable(format!("resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| unreachable(format!("no address for {addr}")))?;

        debug!("connecting to {}@{}", spec.user, addr);
        let tcp = TcpStream::connect_timeout(&sock_addr, timeout)
            .map_err(|e| unreachable(e.to_string()))?;

        let mut session = Session::new().map_err(|e| unreachable(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| unreachable(format!("handshake: {e}")))?;

        let auth_err = |msg: String| RemoteError::Auth {
            host: spec.host.clone(),
            msg,
        };

        match spec.auth.kind {
            AuthKind::Key => {
                let expanded = shellexpand::tilde(&spec.auth.value);
                let key_file = Path::new(expanded.as_ref());
                if !key_file.exists() {
                    return Err(auth_err(format!("SSH key not found: {}", key_file.display())));
                }
                session
                    .userauth_pubkey_file(&spec.user, None, key_file, None)
                    .map_err(|e| auth_err(e.to_string()))?;
            }
            AuthKind::Password => {
                session
                    .userauth_password(&spec.user, &spec.auth.value)
                    .map_err(|e| auth_err(e.to_string()))?;
            }
        }
        if !session.authenticated() {
            return Err(auth_err(format!("credentials rejected for {}", spec.user)));
        }

        info!("connected to {}@{}", spec.user, addr);
        Ok(SshChannel {
            session,
            host: spec.host.clone(),
        })
    }
}

impl RemoteChannel for SshChannel {
    fn execute(&self, cmd: &str) -> Result<String, RemoteError> {
        debug!("exec on {}: {}", self.host, cmd);
        let exec_err = |msg: String| RemoteError::Exec {
            host: self.host.clone(),
            status: -1,
            stderr: msg,
        };

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| exec_err(e.to_string()))?;
        channel.exec(cmd).map_err(|e| exec_err(e.to_string()))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| exec_err(e.to_string()))?;
        let mut stderr = String::new();
        let _ = channel.stderr().read_to_string(&mut stderr);

        channel.wait_close().map_err(|e| exec_err(e.to_string()))?;
        let status = channel.exit_status().map_err(|e| exec_err(e.to_string()))?;
        if status != 0 {
            return Err(RemoteError::Exec {
                host: self.host.clone(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout.trim().to_string())
    }

    fn download(&self, remote: &Path, local: &Path) -> Result<(), RemoteError> {
        let transfer_err = |msg: String| RemoteError::Transfer {
            host: self.host.clone(),
            path: remote.display().to_string(),
            msg,
        };

        let (mut channel, _stat) = self
            .session
            .scp_recv(remote)
            .map_err(|e| transfer_err(e.to_string()))?;
        let mut contents = Vec::new();
        channel
            .read_to_end(&mut contents)
            .map_err(|e| transfer_err(e.to_string()))?;
        channel.send_eof().ok();
        channel.wait_close().ok();

        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(|e| transfer_err(e.to_string()))?;
        }
        std::fs::write(local, contents).map_err(|e| transfer_err(e.to_string()))?;
        debug!("downloaded {}:{} -> {}", self.host, remote.display(), local.display());
        Ok(())
    }

    fn upload(&self, local: &Path, remote: &Path) -> Result<(), RemoteError> {
        let transfer_err = |msg: String| RemoteError::Transfer {
            host: self.host.clone(),
            path: remote.display().to_string(),
            msg,
        };

        let contents = std::fs::read(local).map_err(|e| transfer_err(e.to_string()))?;
        let mut channel = self
            .session
            .scp_send(remote, 0o644, contents.len() as u64, None)
            .map_err(|e| transfer_err(e.to_string()))?;
        channel
            .write_all(&contents)
            .map_err(|e| transfer_err(e.to_string()))?;
        channel.send_eof().ok();
        channel.wait_eof().ok();
        channel.wait_close().ok();
        Ok(())
    }
}
