use clap::{Parser, ValueEnum};
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::environment::{EnvAssignment, Environment};
use crate::error::HarnessError;
use crate::orchestrator::Stage;
use crate::process_manager::{ChildProcessSpec, OutputRouting};
use crate::readiness::{ReadinessGate, TcpProbe};
use crate::scenario::TargetConfig;
use crate::verifier::TrustPolicy;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TrustMode {
    /// Accept any server certificate
    Bypass,
    /// Built-in web PKI roots only
    System,
    /// Built-in roots plus the --ca-bundle file
    Bundle,
}

/// Integration-test harness for a host-routed HTTP/HTTPS forwarding service
#[derive(Debug, Parser)]
#[command(name = "forward-harness")]
#[command(about = "Starts the DNS stub, challenge simulator and forwarding service, then verifies host-routed redirects")]
#[command(version)]
pub struct Cli {
    /// DNS stub command line (whitespace separated)
    #[arg(long, default_value = "dnsserver")]
    pub dns_command: String,

    /// Challenge simulator command line
    #[arg(long, default_value = "pebble -dnsserver 127.0.0.1:1053 -config pebble-config.json")]
    pub challenge_command: String,

    /// Service-under-test command line
    #[arg(long, default_value = "node --env-file=.env.test app.js")]
    pub service_command: String,

    /// Extra environment for the challenge simulator (KEY=VALUE, repeatable)
    #[arg(long = "challenge-env", default_value = "PEBBLE_WFE_NONCEREJECT=0")]
    pub challenge_env: Vec<EnvAssignment>,

    /// Extra environment for the service (KEY=VALUE, repeatable)
    #[arg(long = "service-env")]
    pub service_env: Vec<EnvAssignment>,

    /// Working directory of the challenge simulator (default: current directory)
    #[arg(long)]
    pub challenge_dir: Option<PathBuf>,

    /// Working directory of the service (default: parent of the current directory)
    #[arg(long)]
    pub service_dir: Option<PathBuf>,

    /// CA bundle trusted by the service, relative to the service directory
    #[arg(long, default_value = "test/certs/pebble.minica.pem")]
    pub ca_bundle: PathBuf,

    /// Variable through which the CA bundle path is handed to the service
    #[arg(long, default_value = "NODE_EXTRA_CA_CERTS")]
    pub ca_bundle_env: String,

    #[arg(long, value_enum, default_value = "discard")]
    pub dns_stdout: OutputRouting,

    #[arg(long, value_enum, default_value = "inherit")]
    pub challenge_stdout: OutputRouting,

    #[arg(long, value_enum, default_value = "inherit")]
    pub service_stdout: OutputRouting,

    /// Settle time after starting the DNS stub (ms)
    #[arg(long, default_value = "1000")]
    pub dns_settle_ms: u64,

    /// Settle time after starting the challenge simulator (ms)
    #[arg(long, default_value = "1000")]
    pub challenge_settle_ms: u64,

    /// Settle time after starting the service (ms)
    #[arg(long, default_value = "5000")]
    pub service_settle_ms: u64,

    /// TCP address to probe before the DNS stub counts as ready
    #[arg(long)]
    pub dns_probe: Option<String>,

    /// TCP address to probe before the challenge simulator counts as ready
    #[arg(long)]
    pub challenge_probe: Option<String>,

    /// TCP address to probe before the service counts as ready
    #[arg(long)]
    pub service_probe: Option<String>,

    /// Connection attempts per probe
    #[arg(long, default_value = "10")]
    pub probe_attempts: u32,

    /// Backoff after the first failed probe attempt (ms); doubles each time
    #[arg(long, default_value = "100")]
    pub probe_backoff_ms: u64,

    /// Cap on the probe backoff (ms)
    #[arg(long, default_value = "2000")]
    pub probe_max_backoff_ms: u64,

    /// Delay between verification and teardown (ms)
    #[arg(long, default_value = "1000")]
    pub teardown_delay_ms: u64,

    /// SIGTERM grace period before SIGKILL at teardown (ms); 0 kills outright
    #[arg(long, default_value = "0")]
    pub teardown_grace_ms: u64,

    /// Host to connect to
    #[arg(long, default_value = "localhost")]
    pub connect_host: String,

    #[arg(long, default_value = "8880")]
    pub http_port: u16,

    #[arg(long, default_value = "8843")]
    pub https_port: u16,

    /// Virtual host sent in the Host header
    #[arg(long, default_value = "r.forwarddomain.net")]
    pub virtual_host: String,

    #[arg(long, default_value = "/hello")]
    pub path: String,

    #[arg(long, default_value = "302")]
    pub expected_status: u16,

    #[arg(long, default_value = "https://forwarddomain.net/hello")]
    pub expected_location: String,

    #[arg(long, value_enum, default_value = "bypass")]
    pub tls_trust: TrustMode,

    /// Present the connect host instead of the virtual host as TLS server name
    #[arg(long)]
    pub no_pin_server_name: bool,

    /// Per-request timeout (seconds)
    #[arg(long, default_value = "30")]
    pub request_timeout_secs: u64,

    #[arg(long, default_value = "text/plain")]
    pub accept: String,

    #[arg(long, default_value = "test")]
    pub user_agent: String,

    /// Skip process startup and verify an already running service
    #[arg(long)]
    pub verify_only: bool,

    /// External test runner to run after verification, in the service directory
    #[arg(long)]
    pub suite_command: Option<String>,

    /// Abort the whole run after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

/// Fully resolved harness configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Dependency chain in start order; empty in verify-only mode
    pub stages: Vec<Stage>,
    pub suite: Option<ChildProcessSpec>,
    pub target: TargetConfig,
    pub teardown_delay: Duration,
    pub teardown_grace: Duration,
    pub deadline: Option<Duration>,
}

impl Config {
    /// Parse command line arguments into configuration
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let service_dir = match cli.service_dir {
            Some(dir) => dir,
            None => cwd.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.clone()),
        };

        let expected_status = StatusCode::from_u16(cli.expected_status).map_err(|_| {
            HarnessError::Config(format!("invalid expected status {}", cli.expected_status))
        })?;
        for (flag, value) in [("--accept", &cli.accept), ("--user-agent", &cli.user_agent)] {
            HeaderValue::from_str(value)
                .map_err(|_| HarnessError::Config(format!("{} is not a valid header value", flag)))?;
        }
        if !cli.path.starts_with('/') {
            return Err(HarnessError::Config(format!("path '{}' must start with '/'", cli.path)));
        }

        let probe = |addr: Option<String>| {
            addr.map(|addr| TcpProbe {
                attempts: cli.probe_attempts,
                initial_backoff: Duration::from_millis(cli.probe_backoff_ms),
                max_backoff: Duration::from_millis(cli.probe_max_backoff_ms),
                ..TcpProbe::new(addr)
            })
        };
        let gate = |settle_ms: u64, addr: Option<String>| ReadinessGate {
            settle: Duration::from_millis(settle_ms),
            probe: probe(addr),
        };

        let stages = if cli.verify_only {
            Vec::new()
        } else {
            let dns = ChildProcessSpec::from_command_line("dns", &cli.dns_command)?
                .stdout(cli.dns_stdout);

            let mut challenge = ChildProcessSpec::from_command_line("challenge", &cli.challenge_command)?
                .stdout(cli.challenge_stdout);
            challenge.environment = cli.challenge_env.into_iter().collect();
            if let Some(dir) = cli.challenge_dir {
                challenge = challenge.current_dir(dir);
            }

            let mut service = ChildProcessSpec::from_command_line("service", &cli.service_command)?
                .stdout(cli.service_stdout)
                .current_dir(&service_dir);
            let mut service_env = Environment::new();
            service_env.set(cli.ca_bundle_env, cli.ca_bundle.to_string_lossy());
            service_env.extend(cli.service_env.into_iter().collect());
            service.environment = service_env;

            vec![
                Stage::new(dns, gate(cli.dns_settle_ms, cli.dns_probe)),
                Stage::new(challenge, gate(cli.challenge_settle_ms, cli.challenge_probe)),
                Stage::new(service, gate(cli.service_settle_ms, cli.service_probe)),
            ]
        };

        let suite = match cli.suite_command {
            Some(line) => Some(
                ChildProcessSpec::from_command_line("suite", &line)?
                    .current_dir(&service_dir)
                    .env("HTTP_PORT", cli.http_port.to_string())
                    .env("HTTPS_PORT", cli.https_port.to_string()),
            ),
            None => None,
        };

        let trust = match cli.tls_trust {
            TrustMode::Bypass => TrustPolicy::Bypass,
            TrustMode::System => TrustPolicy::System,
            TrustMode::Bundle => TrustPolicy::Bundle(service_dir.join(&cli.ca_bundle)),
        };

        Ok(Config {
            stages,
            suite,
            target: TargetConfig {
                connect_host: cli.connect_host,
                http_port: cli.http_port,
                https_port: cli.https_port,
                virtual_host: cli.virtual_host,
                path: cli.path,
                expected_status,
                expected_location: cli.expected_location,
                trust,
                pin_server_name: !cli.no_pin_server_name,
                request_timeout: Duration::from_secs(cli.request_timeout_secs),
                accept: cli.accept,
                user_agent: cli.user_agent,
            },
            teardown_delay: Duration::from_millis(cli.teardown_delay_ms),
            teardown_grace: Duration::from_millis(cli.teardown_grace_ms),
            deadline: cli.deadline_secs.map(Duration::from_secs),
        })
    }
}
