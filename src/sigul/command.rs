// src/sigul/command.rs

//! `sigul` subprocess runner

use super::{BatchOutcome, SigningBackend};
use crate::credentials::Passphrase;
use crate::error::{Error, Result};
use crate::signing::RpmId;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Deadline for `get-public-key`
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to wait for stderr after the signer exits or is killed
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// How to invoke sigul for one key
#[derive(Debug, Clone)]
pub struct SigulConfig {
    /// sigul client executable
    pub binary: PathBuf,
    /// Client config file (`-c`), for instances with their own bridge
    pub config_file: Option<PathBuf>,
    /// Secondary architecture (`-k ARCH`) for koji instance selection
    pub arch: Option<String>,
    /// Key name as sigul knows it
    pub key: String,
    /// Emit v3 signatures
    pub v3: bool,
}

impl SigulConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from("sigul"),
            config_file: None,
            arch: None,
            key: key.into(),
            v3: true,
        }
    }
}

/// [`SigningBackend`] that shells out to the sigul client
#[derive(Debug, Clone)]
pub struct SigulBackend {
    config: SigulConfig,
}

impl SigulBackend {
    pub fn new(config: SigulConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SigulConfig {
        &self.config
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        if let Some(ref config_file) = self.config.config_file {
            cmd.arg("-c").arg(config_file);
        }
        cmd.arg("--batch");
        cmd
    }

    /// Arguments for `sign-rpms`, without the leading binary and `-c`
    pub fn sign_args(&self, rpms: &[RpmId]) -> Vec<String> {
        let mut args = vec!["sign-rpms".to_string()];
        if let Some(ref arch) = self.config.arch {
            args.push("-k".to_string());
            args.push(arch.clone());
        }
        args.push("--store-in-koji".to_string());
        args.push("--koji-only".to_string());
        if self.config.v3 {
            args.push("--v3-signature".to_string());
        }
        args.push(self.config.key.clone());
        args.extend(rpms.iter().map(|rpm| rpm.filename.clone()));
        args
    }

    /// Spawn, feed the passphrase and wait up to `timeout`
    fn run(&self, mut cmd: Command, passphrase: &Passphrase, timeout: Duration) -> Result<BatchOutcome> {
        debug!("Running {:?}", cmd);

        // Own process group, so a timeout takes down any helpers sigul forks
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    Error::ToolNotFound(self.config.binary.display().to_string())
                }
                _ => Error::CommandFailed(format!(
                    "Failed to spawn {}: {}",
                    self.config.binary.display(),
                    e
                )),
            })?;

        // Drain stderr on a thread so a chatty signer cannot fill the pipe
        let (stderr_tx, stderr_rx) = flume::bounded(1);
        match child.stderr.take() {
            Some(mut stderr) => {
                thread::spawn(move || {
                    let mut captured = String::new();
                    let _ = stderr.read_to_string(&mut captured);
                    let _ = stderr_tx.send(captured);
                });
            }
            None => drop(stderr_tx),
        }

        if let Err(e) = feed_passphrase(&mut child, passphrase) {
            warn!("Failed to write passphrase to sigul: {}", e);
        }

        let outcome = match child.wait_timeout(timeout)? {
            Some(status) if status.success() => BatchOutcome::Success,
            Some(status) => {
                let code = status.code().unwrap_or(-1);
                BatchOutcome::Failed(format!("sigul exited with code {}", code))
            }
            None => {
                // Hard kill; partially signed state is picked up by the next query
                kill_group(&mut child);
                BatchOutcome::TimedOut
            }
        };

        // A leftover helper may still hold the pipe; give up on it after the grace period
        let stderr = stderr_rx.recv_timeout(STDERR_GRACE).unwrap_or_else(|_| {
            debug!("sigul stderr still open after exit, not waiting for it");
            String::new()
        });
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!("[sigul] {}", line);
        }

        Ok(match outcome {
            BatchOutcome::Failed(detail) => match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                Some(last) => BatchOutcome::Failed(format!("{}: {}", detail, last.trim())),
                None => BatchOutcome::Failed(detail),
            },
            other => other,
        })
    }
}

/// SIGKILL the signer's whole process group, then reap the leader
fn kill_group(child: &mut Child) {
    let killed = i32::try_from(child.id())
        .ok()
        .map(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL));
    if !matches!(killed, Some(Ok(()))) {
        let _ = child.kill();
    }
    let _ = child.wait();
}

/// Write the NUL-terminated passphrase and close stdin
fn feed_passphrase(child: &mut Child, passphrase: &Passphrase) -> io::Result<()> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(passphrase.expose().as_bytes())?;
        stdin.write_all(b"\0")?;
        stdin.flush()?;
    }
    Ok(())
}

impl SigningBackend for SigulBackend {
    fn sign_batch(&self, rpms: &[RpmId], passphrase: &Passphrase, timeout: Duration) -> Result<BatchOutcome> {
        let mut cmd = self.base_command();
        cmd.args(self.sign_args(rpms));

        let start = Instant::now();
        let outcome = self.run(cmd, passphrase, timeout)?;
        debug!(
            "sigul batch of {} rpms finished in {:.1}s: {:?}",
            rpms.len(),
            start.elapsed().as_secs_f64(),
            outcome
        );
        Ok(outcome)
    }

    fn validate(&self, passphrase: &Passphrase) -> Result<bool> {
        let mut cmd = self.base_command();
        cmd.arg("get-public-key").arg(&self.config.key);

        match self.run(cmd, passphrase, VALIDATE_TIMEOUT)? {
            BatchOutcome::Success => Ok(true),
            BatchOutcome::TimedOut => {
                warn!("Validating passphrase for {} timed out", self.config.key);
                Ok(false)
            }
            BatchOutcome::Failed(detail) => {
                debug!("Passphrase for {} rejected: {}", self.config.key, detail);
                Ok(false)
            }
        }
    }
}
