use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;

/// Runs the forward-harness binary the way CI invokes it
pub struct BinaryHarness {
    binary: PathBuf,
    temp_dir: TempDir,
}

/// Exit status plus captured stderr of one binary run
pub struct BinaryRun {
    pub status: ExitStatus,
    pub stderr: String,
}

impl BinaryHarness {
    pub fn new() -> Result<Self> {
        Ok(Self {
            binary: PathBuf::from(env!("CARGO_BIN_EXE_forward-harness")),
            temp_dir: TempDir::new().context("Failed to create temporary directory")?,
        })
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Runs the binary to completion, killing it if it outlives `limit`
    pub async fn run(&self, args: &[&str], limit: Duration) -> Result<BinaryRun> {
        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(self.temp_dir.path())
            .env("RUST_LOG", "debug")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn forward-harness")?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .context("forward-harness did not finish in time")?
            .context("Failed to wait for forward-harness")?;

        Ok(BinaryRun {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Spawns the binary without waiting, for signal tests
    pub fn spawn(&self, args: &[&str]) -> Result<tokio::process::Child> {
        Command::new(&self.binary)
            .args(args)
            .current_dir(self.temp_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn forward-harness")
    }

    pub fn signal(child: &tokio::process::Child, signal: Signal) -> Result<()> {
        let pid = child.id().context("child already reaped")?;
        kill(Pid::from_raw(pid as i32), signal)?;
        Ok(())
    }
}
