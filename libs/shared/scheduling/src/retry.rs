use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use shared_config::AppConfig;

const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Errors that may signal a lost race against a concurrent writer.
pub trait Contended: Sized {
    fn is_contention(&self) -> bool;

    /// Hook to annotate the final error once the retry budget is spent.
    fn exhausted(self, _attempts: u32) -> Self {
        self
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.scheduling_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.scheduling_retry_backoff_ms),
        }
    }

    /// Exponential backoff with full jitter, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(10))
            .min(MAX_BACKOFF);
        let ceiling = exp.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(ceiling / 2..=ceiling))
    }
}

/// Run `attempt` until it succeeds, fails with a non-contention error, or
/// the policy's attempt budget is spent. Each call re-runs the whole unit.
pub async fn retry_on_contention<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T, E>
where
    E: Contended + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut n = 1;
    loop {
        match attempt(n).await {
            Err(e) if e.is_contention() => {
                if n >= policy.max_attempts {
                    warn!("{} gave up after {} contended attempts: {}", operation, n, e);
                    return Err(e.exhausted(n));
                }
                let delay = policy.backoff_for(n);
                warn!("{} lost a race on attempt {} ({}), retrying in {:?}", operation, n, e, delay);
                tokio::time::sleep(delay).await;
                n += 1;
            }
            other => return other,
        }
    }
}
