//! Integration-test driver for a host-routed HTTP forwarding service.
//!
//! Brings up a DNS stub, an ACME challenge simulator and the service under
//! test as child processes, checks the service's redirects over plaintext and
//! TLS, and always tears the processes down again.

pub mod cli;
pub mod environment;
pub mod error;
pub mod harness;
pub mod orchestrator;
pub mod process_manager;
pub mod readiness;
pub mod scenario;
pub mod signals;
pub mod verifier;

pub type Result<T> = std::result::Result<T, HarnessError>;

pub use cli::{Cli, Config};
pub use environment::{EnvAssignment, Environment};
pub use error::HarnessError;
pub use harness::{run_until, TestOutcome};
pub use orchestrator::{Orchestrator, Stage};
pub use process_manager::{ChildProcessSpec, ManagedProcess, OutputRouting, ProcessHandle, ProcessState};
pub use readiness::{ReadinessGate, TcpProbe};
pub use scenario::{redirect_scenario, Expectation, ExpectedAssertion, TargetConfig};
pub use signals::Signals;
pub use verifier::{
    assert_redirect_location, assert_status, ObservedResponse, RequestConfig, Scheme, StepOutcome,
    TrustPolicy, Verifier,
};
