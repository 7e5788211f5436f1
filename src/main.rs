type Result<T> = color_eyre::eyre::Result<T>;

use clap::Parser;
use eyre::WrapErr;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use forward_harness::{run_until, Cli, Config, Signals};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // clap would exit with 2, which is reserved for start failures
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print()?;
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };
    let config = Config::from_cli(cli).wrap_err("invalid command line")?;

    // Installed before any child is spawned so Ctrl+C always reaches teardown
    let signals = Signals::new().wrap_err("failed to install signal handlers")?;

    info!(
        "forward-harness starting with {} dependency stages",
        config.stages.len()
    );
    let outcome = run_until(&config, signals.first()).await;
    let elapsed = outcome.finished_at - outcome.started_at;

    match outcome.error {
        Some(ref e) => {
            error!(run_id = %outcome.run_id, "Test Error: {}", e);
            eprintln!("Test Error: {}", e);
        }
        None => {
            info!(
                run_id = %outcome.run_id,
                "{} steps passed in {}ms",
                outcome.steps.len(),
                elapsed.num_milliseconds()
            );
        }
    }

    std::process::exit(outcome.exit_code());
}
