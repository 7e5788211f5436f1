use crate::error::HarnessError;
use crate::process_manager::{ChildProcessSpec, ManagedProcess, ProcessHandle, ProcessState};
use crate::readiness::ReadinessGate;
use crate::Result;
use std::process::ExitStatus;
use std::time::Duration;
use tracing::{error, info, warn};

/// One step of the dependency chain: a process and the gate that must be
/// passed before anything may depend on it
#[derive(Debug, Clone)]
pub struct Stage {
    pub spec: ChildProcessSpec,
    pub gate: ReadinessGate,
}

impl Stage {
    pub fn new(spec: ChildProcessSpec, gate: ReadinessGate) -> Self {
        Self { spec, gate }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Brings dependency processes up in order and guarantees they all go down
///
/// Every successfully started process is tracked immediately. `teardown_all`
/// terminates them; if the orchestrator is dropped first (panic, cancelled
/// future) the `Drop` impl kills whatever is still running.
pub struct Orchestrator {
    processes: Vec<ManagedProcess>,
    teardown_grace: Duration,
}

impl Orchestrator {
    /// # Arguments
    /// * `teardown_grace` - SIGTERM grace period before SIGKILL; zero kills outright
    pub fn new(teardown_grace: Duration) -> Self {
        Self {
            processes: Vec::new(),
            teardown_grace,
        }
    }

    /// Launches a process and registers it for teardown.
    ///
    /// Does not wait for the process. A failed launch registers nothing.
    pub fn start(&mut self, spec: ChildProcessSpec) -> Result<ProcessHandle> {
        let mut process = ManagedProcess::new(spec);
        let handle = process.spawn()?;
        self.processes.push(process);
        Ok(handle)
    }

    /// Waits out a readiness gate, then makes sure nothing tracked has died
    /// in the meantime.
    pub async fn await_settled(&mut self, name: &str, gate: &ReadinessGate) -> Result<()> {
        gate.await_settled(name).await?;
        self.check_alive()
    }

    /// Starts every stage in order, gating each one before the next.
    ///
    /// The first failure aborts the remaining stages; processes already
    /// started stay tracked for teardown.
    pub async fn bring_up(&mut self, stages: &[Stage]) -> Result<Vec<ProcessHandle>> {
        let mut handles = Vec::with_capacity(stages.len());
        for stage in stages {
            let handle = self.start(stage.spec.clone())?;
            self.await_settled(stage.name(), &stage.gate).await?;
            info!("Stage {} settled", handle);
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Runs a process to completion while keeping it tracked, so an
    /// interrupted run still tears it down.
    pub async fn run_to_completion(&mut self, spec: ChildProcessSpec) -> Result<ExitStatus> {
        self.start(spec)?;
        let index = self.processes.len() - 1;
        self.processes[index].wait().await
    }

    fn check_alive(&mut self) -> Result<()> {
        for process in &mut self.processes {
            if process.state() != ProcessState::Running {
                continue;
            }
            if let Some(status) = process.try_exit_status()? {
                error!("{} exited during startup with {}", process.name(), status);
                return Err(HarnessError::ExitedEarly {
                    name: process.name().to_string(),
                    status,
                });
            }
        }
        Ok(())
    }

    /// Terminates every tracked process.
    ///
    /// All processes are attempted even if one fails; the first failure is
    /// returned afterwards. Processes that already exited are skipped.
    pub async fn teardown_all(&mut self) -> Result<()> {
        let running = self
            .processes
            .iter()
            .filter(|p| p.state() == ProcessState::Running)
            .count();
        info!("Tearing down {} of {} tracked processes", running, self.processes.len());

        let mut first_error = None;
        for process in &mut self.processes {
            if let Err(e) = process.terminate(self.teardown_grace).await {
                warn!("Teardown of {} failed: {}", process.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.processes.iter().filter_map(ManagedProcess::handle).collect()
    }

    /// Final state of every tracked process, in start order
    pub fn states(&self) -> Vec<(ProcessHandle, ProcessState)> {
        self.processes
            .iter()
            .filter_map(|p| p.handle().map(|h| (h, p.state())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for process in &mut self.processes {
            if process.state() == ProcessState::Running {
                warn!(
                    "Orchestrator dropped with {} still running (PID {:?}), killing its process group",
                    process.name(),
                    process.pid()
                );
                process.kill_now();
            }
        }
    }
}
