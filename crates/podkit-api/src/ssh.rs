// ── SSH tunnel ──
//
// Makes a remote unix socket reachable through a local one by running the
// system `ssh` client with a socket-to-socket `-L` forward. A tunnel is a
// scoped resource: `close()` kills and reaps ssh and removes the local
// socket, and `Drop` does the same for every path that never calls it.

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::uri::SshTarget;

/// How the ssh client is launched and how long to wait for the forward.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// ssh executable, looked up on `PATH` when relative.
    pub ssh_program: PathBuf,
    /// Directory for local sockets. Defaults to `$XDG_RUNTIME_DIR/podkit`,
    /// or `<tmp>/podkit` when no runtime directory is set.
    pub socket_dir: Option<PathBuf>,
    /// Number of checks for the local socket before giving up.
    pub attempts: u32,
    /// Delay between two checks.
    pub interval: Duration,
    /// Passed to ssh as `ConnectTimeout`.
    pub connect_timeout: Duration,
    /// Known-hosts file to verify the host key against instead of the
    /// user's default store. Verification itself is always on.
    pub known_hosts: Option<PathBuf>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ssh_program: PathBuf::from("ssh"),
            socket_dir: None,
            attempts: 50,
            interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(30),
            known_hosts: None,
        }
    }
}

impl TunnelConfig {
    /// A fresh, unique local socket path.
    pub fn ephemeral_socket(&self) -> PathBuf {
        let dir = self.socket_dir.clone().unwrap_or_else(|| {
            std::env::var_os("XDG_RUNTIME_DIR")
                .map_or_else(std::env::temp_dir, PathBuf::from)
                .join("podkit")
        });
        dir.join(format!("ssh-{}.sock", Uuid::new_v4().simple()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Starting,
    Ready,
    Closed,
}

/// A running `ssh -L` forward.
#[derive(Debug)]
pub struct Tunnel {
    target: SshTarget,
    local_socket: PathBuf,
    child: Option<Child>,
    state: TunnelState,
}

impl Tunnel {
    /// Open a tunnel on a fresh local socket path.
    pub async fn open(target: &SshTarget, config: &TunnelConfig) -> Result<Self, Error> {
        Self::open_at(target, config.ephemeral_socket(), config).await
    }

    /// Open a tunnel on the given local socket path.
    ///
    /// The identity file is validated before anything is spawned or
    /// created. Any stale file at `local_socket` is removed.
    pub async fn open_at(
        target: &SshTarget,
        local_socket: PathBuf,
        config: &TunnelConfig,
    ) -> Result<Self, Error> {
        if target.host.starts_with('-') {
            return Err(Error::configuration(format!(
                "invalid SSH host '{}'",
                target.host
            )));
        }
        if let Some(identity) = &target.identity_file {
            validate_identity(identity)?;
        }

        prepare_socket_path(&local_socket)?;

        let mut cmd = Command::new(&config.ssh_program);
        cmd.args(ssh_args(target, &local_socket, config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %config.ssh_program.display(),
            destination = %target.destination(),
            port = target.port,
            local = %local_socket.display(),
            remote = %target.remote_path.display(),
            "spawning ssh tunnel"
        );

        let child = cmd.spawn().map_err(|e| {
            Error::connection(
                target.destination(),
                format!("failed to start {}: {e}", config.ssh_program.display()),
            )
        })?;

        let mut tunnel = Self {
            target: target.clone(),
            local_socket,
            child: Some(child),
            state: TunnelState::Starting,
        };

        match tunnel.wait_ready(config).await {
            Ok(()) => {
                tunnel.state = TunnelState::Ready;
                if let Some(stderr) = tunnel.child.as_mut().and_then(|c| c.stderr.take()) {
                    tokio::spawn(log_stderr(stderr, tunnel.target.destination()));
                }
                info!(
                    destination = %tunnel.target.destination(),
                    local = %tunnel.local_socket.display(),
                    "ssh tunnel ready"
                );
                Ok(tunnel)
            }
            Err(err) => {
                if let Err(cleanup) = tunnel.close().await {
                    warn!(error = %cleanup, "failed to clean up ssh tunnel");
                }
                Err(err)
            }
        }
    }

    pub fn local_socket(&self) -> &Path {
        &self.local_socket
    }

    pub fn remote_socket(&self) -> &Path {
        &self.target.remote_path
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Process id of the ssh client while it runs.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Kill ssh, wait for it to exit and remove the local socket.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(mut child) = self.child.take() {
            let exited = child
                .try_wait()
                .map_err(|e| Error::connection(self.target.destination(), e))?;
            if exited.is_none() {
                child
                    .kill()
                    .await
                    .map_err(|e| Error::connection(self.target.destination(), e))?;
            }
        }

        let removed = remove_socket(&self.local_socket);
        if self.state != TunnelState::Closed {
            info!(local = %self.local_socket.display(), "ssh tunnel closed");
        }
        self.state = TunnelState::Closed;
        removed
    }

    async fn wait_ready(&mut self, config: &TunnelConfig) -> Result<(), Error> {
        for attempt in 1..=config.attempts {
            if self.local_socket.exists() {
                debug!(attempt, "tunnel socket is up");
                return Ok(());
            }

            if let Some(child) = self.child.as_mut() {
                let status = child
                    .try_wait()
                    .map_err(|e| Error::connection(self.target.destination(), e))?;
                if let Some(status) = status {
                    let mut stderr = String::new();
                    if let Some(mut pipe) = child.stderr.take() {
                        // Best effort: the message is only used for the error.
                        let _ = pipe.read_to_string(&mut stderr).await;
                    }
                    return Err(Error::connection(
                        self.target.destination(),
                        format!("ssh exited with {status}: {}", stderr.trim()),
                    ));
                }
            }

            tokio::time::sleep(config.interval).await;
        }

        Err(Error::connection(
            self.target.destination(),
            format!(
                "tunnel socket {} did not appear after {} attempts",
                self.local_socket.display(),
                config.attempts
            ),
        ))
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "ssh already exited");
            }
        }
        if self.state != TunnelState::Closed {
            if let Err(e) = remove_socket(&self.local_socket) {
                warn!(error = %e, "failed to remove tunnel socket");
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Keep reading ssh's stderr for the life of the tunnel so a chatty ssh
/// never blocks on a full pipe. Ends when ssh exits.
async fn log_stderr(stderr: ChildStderr, destination: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(destination = %destination, "ssh: {line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(destination = %destination, error = %e, "ssh stderr closed");
                break;
            }
        }
    }
}

/// Require the identity file to exist and be readable by its owner only.
pub fn validate_identity(path: &Path) -> Result<(), Error> {
    let meta = std::fs::metadata(path).map_err(|e| {
        Error::configuration(format!(
            "identity file {} is not accessible: {e}",
            path.display()
        ))
    })?;

    if !meta.is_file() {
        return Err(Error::configuration(format!(
            "identity file {} is not a regular file",
            path.display()
        )));
    }

    let mode = meta.permissions().mode() & 0o777;
    if mode != 0o600 {
        return Err(Error::configuration(format!(
            "identity file {} has mode {mode:04o}, expected 0600",
            path.display()
        )));
    }
    Ok(())
}

fn ssh_args(target: &SshTarget, local_socket: &Path, config: &TunnelConfig) -> Vec<String> {
    let mut args = vec![
        "-N".to_owned(),
        "-o".to_owned(),
        "StrictHostKeyChecking=yes".to_owned(),
        "-o".to_owned(),
        "ExitOnForwardFailure=yes".to_owned(),
        "-o".to_owned(),
        "BatchMode=yes".to_owned(),
        "-o".to_owned(),
        format!("ConnectTimeout={}", config.connect_timeout.as_secs().max(1)),
    ];
    if let Some(known_hosts) = &config.known_hosts {
        args.push("-o".to_owned());
        args.push(format!("UserKnownHostsFile={}", known_hosts.display()));
    }
    args.push("-p".to_owned());
    args.push(target.port.to_string());
    if let Some(identity) = &target.identity_file {
        args.push("-i".to_owned());
        args.push(identity.display().to_string());
    }
    args.push("-L".to_owned());
    args.push(format!(
        "{}:{}",
        local_socket.display(),
        target.remote_path.display()
    ));
    args.push("--".to_owned());
    args.push(target.destination());
    args
}

fn prepare_socket_path(path: &Path) -> Result<(), Error> {
    if let Some(dir) = path.parent() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(|e| {
                Error::configuration(format!(
                    "cannot create socket directory {}: {e}",
                    dir.display()
                ))
            })?;
    }
    remove_socket(path)
}

fn remove_socket(path: &Path) -> Result<(), Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::connection(
            path.display().to_string(),
            format!("failed to remove socket: {e}"),
        )),
    }
}
