use crate::error::HarnessError;
use crate::Result;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// Socket-connect readiness probe with bounded, exponentially backed-off retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpProbe {
    /// `host:port` to connect to
    pub addr: String,
    /// Number of connection attempts before giving up
    pub attempts: u32,
    /// Delay after the first failed attempt; doubles after each failure
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts
    pub max_backoff: Duration,
    /// Timeout for a single connection attempt
    pub connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(500),
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Connects until the address accepts or the attempts run out.
    ///
    /// # Returns
    /// * `Result<u32>` - Number of attempts it took, or `NotReady`
    pub async fn wait_ready(&self, name: &str) -> Result<u32> {
        for attempt in 0..self.attempts {
            match timeout(self.connect_timeout, TcpStream::connect(self.addr.as_str())).await {
                Ok(Ok(_)) => {
                    info!("{} ready at {} (attempt {})", name, self.addr, attempt + 1);
                    return Ok(attempt + 1);
                }
                Ok(Err(e)) => debug!("{} probe of {} failed: {}", name, self.addr, e),
                Err(_) => debug!("{} probe of {} timed out", name, self.addr),
            }

            if attempt + 1 < self.attempts {
                sleep(self.backoff(attempt)).await;
            }
        }

        Err(HarnessError::NotReady {
            name: name.to_string(),
            addr: self.addr.clone(),
            attempts: self.attempts,
        })
    }
}

/// The wait applied after a stage is started and before the next one may
/// depend on it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessGate {
    /// Fixed delay, applied after the probe (if any) succeeds
    pub settle: Duration,
    pub probe: Option<TcpProbe>,
}

impl ReadinessGate {
    /// A purely time-based gate
    pub fn delay(settle: Duration) -> Self {
        Self { settle, probe: None }
    }

    pub fn with_probe(mut self, probe: TcpProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub async fn await_settled(&self, name: &str) -> Result<()> {
        if let Some(ref probe) = self.probe {
            probe.wait_ready(name).await?;
        }
        if !self.settle.is_zero() {
            debug!("Letting {} settle for {:?}", name, self.settle);
            sleep(self.settle).await;
        }
        Ok(())
    }
}
