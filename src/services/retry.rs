use crate::core::error::{ApiError, Endpoint};
use crate::services::rate_limit::RateLimitConfig;
use log::warn;
use std::future::Future;
use tokio::time::{sleep, Duration};

/// Retries a failed call at most once, and only for rate limiting or
/// transient network failures. Everything else fails fast.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_secs(config.retry_delay_seconds))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn execute<T, F, Fut>(
        &self,
        endpoint: Endpoint,
        mut operation: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match operation().await {
            Ok(value) => Ok(value),
            Err(e) if e.kind.is_retryable() => {
                warn!(
                    "{} call failed ({}). Waiting {} seconds before retry...",
                    endpoint,
                    e,
                    self.delay.as_secs_f64()
                );
                sleep(self.delay).await;
                operation().await.map_err(|e| {
                    warn!("{} retry failed: {}", endpoint, e);
                    e
                })
            }
            Err(e) => Err(e),
        }
    }
}
