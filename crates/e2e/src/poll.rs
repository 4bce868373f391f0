//! Polling with exponential backoff for eventually-consistent state

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Overall deadline, measured from the first probe
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }
}

impl PollConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interval to wait after `current`, capped at `max_interval`
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Repeatedly run `probe` until it yields `Some(value)` or the deadline passes.
///
/// Probe errors are returned immediately; only "not yet" (`Ok(None)`) is
/// retried. Exhaustion is reported as [`E2eError::PollTimeout`].
pub async fn poll_until<T, F, Fut>(config: &PollConfig, what: &str, mut probe: F) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Option<T>>>,
{
    let start = Instant::now();
    let mut interval = config.initial_interval;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(value) = probe().await? {
            debug!("{} satisfied after {} attempt(s)", what, attempts);
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(E2eError::PollTimeout {
                what: what.to_string(),
                attempts,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        let remaining = config.timeout - elapsed;
        debug!("{} not yet satisfied (attempt {}), retrying in {:?}", what, attempts, interval);
        sleep(interval.min(remaining)).await;
        interval = config.next_interval(interval);
    }
}
