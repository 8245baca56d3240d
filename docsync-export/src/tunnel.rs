//! SSH port forward held open for the duration of a query.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use docsync_core::config::TunnelConfig;
use tracing::{debug, info};

use crate::error::{io_err, spawn_err, ExportError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running `ssh -N -L` child. Killed on [`close`](Self::close) or drop.
#[derive(Debug)]
pub struct TunnelGuard {
    child: Child,
    program: PathBuf,
    local_port: u16,
    closed: bool,
}

impl TunnelGuard {
    /// Start the forward and wait until the local end accepts connections.
    pub fn open(
        config: &TunnelConfig,
        ssh_program: &Path,
        timeout: Duration,
    ) -> Result<Self, ExportError> {
        let local_port = match config.local_port {
            Some(port) => port,
            None => free_port().map_err(|e| io_err("127.0.0.1:0", e))?,
        };
        let args = ssh_args(config, local_port);
        debug!(program = %ssh_program.display(), ?args, "starting ssh tunnel");

        let child = Command::new(ssh_program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_err(ssh_program, e))?;
        let mut guard = Self {
            child,
            program: ssh_program.to_path_buf(),
            local_port,
            closed: false,
        };
        guard.wait_ready(timeout)?;
        info!(
            port = local_port,
            host = %config.ssh_host,
            remote = %format!("{}:{}", config.db_host, config.db_port),
            "ssh tunnel up"
        );
        Ok(guard)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Stop the forward now.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<(), ExportError> {
        let started = Instant::now();
        let addr = SocketAddr::from(([127, 0, 0, 1], self.local_port));
        loop {
            if let Some(status) = self.child.try_wait().map_err(|e| io_err(&self.program, e))? {
                self.closed = true;
                let mut stderr = String::new();
                if let Some(mut pipe) = self.child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                debug!(stderr = %stderr.trim(), "ssh exited early");
                return Err(ExportError::TunnelExited { status });
            }
            if TcpStream::connect_timeout(&addr, POLL_INTERVAL).is_ok() {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(ExportError::TunnelTimeout {
                    port: self.local_port,
                    waited: started.elapsed(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.closed = true;
        debug!(port = self.local_port, "ssh tunnel closed");
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Arguments for a non-interactive local forward to the database host.
pub fn ssh_args(config: &TunnelConfig, local_port: u16) -> Vec<String> {
    vec![
        "-N".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-i".to_string(),
        config.ssh_pkey.display().to_string(),
        "-p".to_string(),
        config.ssh_port.to_string(),
        "-L".to_string(),
        format!("127.0.0.1:{local_port}:{}:{}", config.db_host, config.db_port),
        format!("{}@{}", config.ssh_user, config.ssh_host),
    ]
}

// The listener is dropped before ssh binds; another process could take the
// port in between, in which case ssh exits and `open` reports it.
fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
