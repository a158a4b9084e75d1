//! Bounded retries for remote calls. Every attempt runs under its own
//! deadline, attempts are spaced by a doubling, jittered pause.

use std::{fmt, future::Future, time::Duration};

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

/// A single attempt did not finish within the policy's deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeout(pub Duration);

impl fmt::Display for AttemptTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt exceeded {:?}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before the last error is returned. Zero behaves as one.
    pub attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt`, before jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.first_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `call` until it succeeds or the attempts are used up. A timed out
    /// attempt is dropped and counts as a failure like any other.
    pub async fn run<F, Fut, T, E>(&self, what: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AttemptTimeout> + fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match timeout(self.attempt_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => E::from(AttemptTimeout(self.attempt_timeout)),
            };
            if attempt >= attempts {
                error!(what, attempt, error = %err, "giving up");
                return Err(err);
            }

            // Nodes booted together would otherwise retry in lockstep.
            let pause = self
                .backoff(attempt)
                .mul_f64(rand::thread_rng().gen_range(0.5..1.5));
            warn!(
                what,
                attempt,
                error = %err,
                pause_ms = pause.as_millis() as u64,
                "retrying"
            );
            sleep(pause).await;
        }
    }
}
