//! One complete harness run: bring-up, verification, teardown.

use crate::cli::Config;
use crate::error::HarnessError;
use crate::orchestrator::Orchestrator;
use crate::process_manager::{ProcessHandle, ProcessState};
use crate::scenario::redirect_scenario;
use crate::verifier::{StepOutcome, Verifier};
use crate::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::select;
use tokio::time::{sleep, timeout};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Result of a run, as reported to the caller
#[derive(Debug)]
pub struct TestOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Verification steps that passed; empty unless the whole scenario passed
    pub steps: Vec<StepOutcome>,
    /// Final state of every process the run started
    pub processes: Vec<(ProcessHandle, ProcessState)>,
    pub error: Option<HarnessError>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, HarnessError::exit_code)
    }
}

/// Runs the harness until it finishes or `interrupt` resolves.
///
/// Teardown of every started process happens before this returns, whichever
/// way the run ended.
pub async fn run_until<F>(config: &Config, interrupt: F) -> TestOutcome
where
    F: Future<Output = &'static str>,
{
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    async move {
        let mut orchestrator = Orchestrator::new(config.teardown_grace);

        let result = select! {
            result = with_deadline(drive(&mut orchestrator, config), config.deadline) => {
                if !config.teardown_delay.is_zero() {
                    sleep(config.teardown_delay).await;
                }
                result
            }
            signal = interrupt => {
                warn!("Received {}, aborting run", signal);
                Err(HarnessError::Interrupted(signal))
            }
        };

        let teardown = orchestrator.teardown_all().await;
        let error = match (result, teardown) {
            (Ok(steps), Ok(())) => {
                return finish(run_id, started_at, steps, &orchestrator, None);
            }
            (Ok(_), Err(e)) => e,
            (Err(e), Ok(())) => e,
            (Err(e), Err(teardown_error)) => {
                warn!("Teardown also failed: {}", teardown_error);
                e
            }
        };
        error!("Run failed: {}", error);
        finish(run_id, started_at, Vec::new(), &orchestrator, Some(error))
    }
    .instrument(info_span!("run", %run_id))
    .await
}

/// Bring-up, verification and the optional external suite
async fn drive(orchestrator: &mut Orchestrator, config: &Config) -> Result<Vec<StepOutcome>> {
    if !config.stages.is_empty() {
        orchestrator.bring_up(&config.stages).await?;
    }

    let verifier = Verifier::new(&config.target).await?;
    let steps = verifier.run(&redirect_scenario(&config.target)?).await?;
    info!("All {} verification steps passed", steps.len());

    if let Some(ref suite) = config.suite {
        let status = orchestrator.run_to_completion(suite.clone()).await?;
        if !status.success() {
            return Err(HarnessError::Suite {
                command: suite.command_line(),
                status,
            });
        }
        info!("Test suite `{}` passed", suite.command_line());
    }

    Ok(steps)
}

async fn with_deadline<T>(
    run: impl Future<Output = Result<T>>,
    deadline: Option<Duration>,
) -> Result<T> {
    match deadline {
        Some(limit) => timeout(limit, run)
            .await
            .unwrap_or(Err(HarnessError::DeadlineExceeded(limit))),
        None => run.await,
    }
}

fn finish(
    run_id: Uuid,
    started_at: DateTime<Utc>,
    steps: Vec<StepOutcome>,
    orchestrator: &Orchestrator,
    error: Option<HarnessError>,
) -> TestOutcome {
    TestOutcome {
        run_id,
        started_at,
        finished_at: Utc::now(),
        steps,
        processes: orchestrator.states(),
        error,
    }
}
