use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a harness run
///
/// Every variant bubbles up to the harness, which tears down the child
/// processes before turning the error into an exit code.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A dependency process could not be launched
    #[error("failed to start {name} (`{command}`): {source}")]
    Start {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A dependency process died before the next stage could depend on it
    #[error("{name} exited during startup with {status}")]
    ExitedEarly { name: String, status: ExitStatus },

    /// A readiness probe never connected
    #[error("{name} not ready at {addr} after {attempts} attempts")]
    NotReady {
        name: String,
        addr: String,
        attempts: u32,
    },

    /// Transport-level failure reaching the service
    #[error("{step}: request to {url} failed: {source}")]
    Request {
        step: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered, but not with what was expected
    #[error("{step}: expected {what} {expected}, got {actual}")]
    Assertion {
        step: String,
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("test suite `{command}` failed with {status}")]
    Suite { command: String, status: ExitStatus },

    #[error("failed to terminate {name}: {source}")]
    Teardown {
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("interrupted by {0}")]
    Interrupted(&'static str),

    #[error("run exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// True for failures that happened while bringing up dependencies
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            HarnessError::Start { .. } | HarnessError::ExitedEarly { .. } | HarnessError::NotReady { .. }
        )
    }

    /// Process exit code reported for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Start { .. }
            | HarnessError::ExitedEarly { .. }
            | HarnessError::NotReady { .. } => 2,
            HarnessError::Request { .. } => 3,
            HarnessError::Assertion { .. } => 4,
            HarnessError::Suite { .. } => 5,
            HarnessError::Teardown { .. } => 6,
            HarnessError::DeadlineExceeded(_) => 124,
            HarnessError::Interrupted(_) => 130,
            HarnessError::Config(_) | HarnessError::Io(_) => 1,
        }
    }
}
