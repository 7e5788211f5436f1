use crate::environment::Environment;
use crate::error::HarnessError;
use crate::Result;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on how long teardown waits for a killed process to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a child's output stream goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputRouting {
    /// Share the harness's stream
    #[default]
    Inherit,
    /// Send to /dev/null
    Discard,
}

impl OutputRouting {
    fn stdio(self) -> Stdio {
        match self {
            OutputRouting::Inherit => Stdio::inherit(),
            OutputRouting::Discard => Stdio::null(),
        }
    }
}

/// Everything needed to launch one dependency process
#[derive(Debug, Clone)]
pub struct ChildProcessSpec {
    /// Short name used in logs and errors ("dns", "challenge", ...)
    pub name: String,
    /// Executable, resolved through PATH
    pub command: String,
    /// Arguments for the command
    pub args: Vec<String>,
    /// Overrides layered on top of the inherited environment
    pub environment: Environment,
    /// Working directory for the process
    pub working_directory: Option<PathBuf>,
    pub stdout: OutputRouting,
    pub stderr: OutputRouting,
}

impl ChildProcessSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            environment: Environment::new(),
            working_directory: None,
            stdout: OutputRouting::Inherit,
            stderr: OutputRouting::Inherit,
        }
    }

    /// Builds a spec from a whitespace-separated command line.
    ///
    /// No shell quoting is applied; the first word is the executable.
    pub fn from_command_line(name: impl Into<String>, line: &str) -> Result<Self> {
        let name = name.into();
        let mut words = line.split_whitespace().map(str::to_string);
        let command = words
            .next()
            .ok_or_else(|| HarnessError::Config(format!("empty command for {}", name)))?;
        let mut spec = Self::new(name, command);
        spec.args = words.collect();
        Ok(spec)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn stdout(mut self, routing: OutputRouting) -> Self {
        self.stdout = routing;
        self
    }

    pub fn stderr(mut self, routing: OutputRouting) -> Self {
        self.stderr = routing;
        self
    }

    /// The command line as it would be typed, for logs and error messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        command.envs(self.environment.iter());

        if let Some(ref work_dir) = self.working_directory {
            command.current_dir(work_dir);
        }

        // Each child leads its own process group so teardown also reaches
        // anything it forks.
        command.process_group(0);
        command.kill_on_drop(true);
        command.stdin(Stdio::null());
        command.stdout(self.stdout.stdio());
        command.stderr(self.stderr.stdio());
        command
    }
}

/// Lifecycle of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Terminated,
}

/// Lightweight reference to a started process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub name: String,
    pub pid: Pid,
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (PID {})", self.name, self.pid)
    }
}

/// A child process together with its spec and lifecycle state
///
/// The orchestrator owns these exclusively; nothing else signals or waits on
/// the underlying process.
#[derive(Debug)]
pub struct ManagedProcess {
    spec: ChildProcessSpec,
    state: ProcessState,
    pid: Option<Pid>,
    child: Option<Child>,
    exit_status: Option<ExitStatus>,
}

impl ManagedProcess {
    pub fn new(spec: ChildProcessSpec) -> Self {
        Self {
            spec,
            state: ProcessState::NotStarted,
            pid: None,
            child: None,
            exit_status: None,
        }
    }

    /// Launches the process without waiting for it.
    ///
    /// # Returns
    /// * `Result<ProcessHandle>` - Handle of the running process, or a start error
    ///   if the executable could not be located or launched
    pub fn spawn(&mut self) -> Result<ProcessHandle> {
        if self.state != ProcessState::NotStarted {
            return Err(HarnessError::Config(format!(
                "{} has already been started",
                self.spec.name
            )));
        }

        info!("Spawning {}: {}", self.spec.name, self.spec.command_line());
        if !self.spec.environment.is_empty() {
            debug!("{} environment overrides: {:?}", self.spec.name, self.spec.environment.keys());
        }

        let start_error = |source: std::io::Error| HarnessError::Start {
            name: self.spec.name.clone(),
            command: self.spec.command_line(),
            source,
        };

        let child = self.spec.to_command().spawn().map_err(start_error)?;
        let raw_pid = child.id().ok_or_else(|| {
            start_error(std::io::Error::other("process exited before its PID was read"))
        })?;
        let pid = Pid::from_raw(raw_pid as i32);

        self.pid = Some(pid);
        self.child = Some(child);
        self.state = ProcessState::Running;

        info!("{} spawned with PID: {}", self.spec.name, pid);
        Ok(ProcessHandle {
            name: self.spec.name.clone(),
            pid,
        })
    }

    /// Non-blocking check whether the process has exited on its own
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        match child.try_wait()? {
            Some(status) => {
                self.record_exit(status);
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Waits for the process to finish on its own
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let child = self.child.as_mut().ok_or_else(|| {
            HarnessError::Config(format!("{} was never started", self.spec.name))
        })?;
        let status = child.wait().await?;
        self.record_exit(status);
        Ok(status)
    }

    /// Terminates the whole process group and reaps the leader.
    ///
    /// With a non-zero `grace` the group first gets SIGTERM and the chance to
    /// exit; otherwise it is killed outright. A process that is already gone is
    /// not an error.
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.state != ProcessState::Running {
            return Ok(());
        }

        if !grace.is_zero() {
            self.signal_group(Signal::SIGTERM)?;
            if self.wait_with_timeout(grace).await.is_some() {
                info!("{} exited gracefully", self.spec.name);
                return Ok(());
            }
            warn!("{} did not exit within {:?}, forcing kill", self.spec.name, grace);
        }

        self.signal_group(Signal::SIGKILL)?;
        match self.wait_with_timeout(REAP_TIMEOUT).await {
            Some(status) => info!("{} killed, exit status: {}", self.spec.name, status),
            None => {
                warn!("{} still not reaped after SIGKILL", self.spec.name);
                self.state = ProcessState::Terminated;
            }
        }
        Ok(())
    }

    /// Synchronous last-resort kill used from `Drop`
    pub fn kill_now(&mut self) {
        if self.state != ProcessState::Running {
            return;
        }
        if let Err(e) = self.signal_group(Signal::SIGKILL) {
            warn!("Emergency kill failed: {}", e);
        }
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
        self.state = ProcessState::Terminated;
    }

    fn signal_group(&self, signal: Signal) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        debug!("Sending {:?} to process group {}", signal, pid);
        match killpg(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(HarnessError::Teardown {
                name: self.spec.name.clone(),
                source,
            }),
        }
    }

    async fn wait_with_timeout(&mut self, limit: Duration) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => {
                self.record_exit(status);
                Some(status)
            }
            Ok(Err(e)) => {
                warn!("Error waiting for {}: {}", self.spec.name, e);
                None
            }
            Err(_) => None,
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
        self.state = ProcessState::Terminated;
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn handle(&self) -> Option<ProcessHandle> {
        self.pid.map(|pid| ProcessHandle {
            name: self.spec.name.clone(),
            pid,
        })
    }
}
