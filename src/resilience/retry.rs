use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{error, warn};

use crate::cache::error::TokenError;
use crate::config::settings::RetryConfig;
use crate::observability::metrics::get_metrics;
use crate::utils::constants::{
    DEFAULT_RETRY_FACTOR, DEFAULT_RETRY_INITIAL_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
    DEFAULT_RETRY_MAX_RETRIES,
};

pub type ShouldRetry = Arc<dyn Fn(&TokenError) -> bool + Send + Sync>;

/// Everything except a 4xx status is worth another attempt.
pub fn default_should_retry(error: &TokenError) -> bool {
    !matches!(error.status(), Some(400..=499))
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub factor: f64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    should_retry: ShouldRetry,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            factor: DEFAULT_RETRY_FACTOR,
            initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            max_retries: DEFAULT_RETRY_MAX_RETRIES,
            should_retry: Arc::new(default_should_retry),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("factor", &self.factor)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let default = RetryPolicy::default();
        Self {
            factor: config.factor.unwrap_or(default.factor),
            initial_delay_ms: config.initial_delay_ms.unwrap_or(default.initial_delay_ms),
            max_delay_ms: config.max_delay_ms.unwrap_or(default.max_delay_ms),
            max_retries: config.max_retries.unwrap_or(default.max_retries),
            should_retry: default.should_retry,
        }
    }
}

impl RetryPolicy {
    pub fn new(factor: f64, initial_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            factor,
            initial_delay_ms,
            max_delay_ms,
            max_retries,
            should_retry: Arc::new(default_should_retry),
        }
    }

    pub fn with_should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&TokenError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn should_retry(&self, error: &TokenError) -> bool {
        (self.should_retry)(error)
    }

    /// Runs `operation` for attempts `0..=max_retries`.
    ///
    /// A non-retryable error or the last failed attempt is returned as is.
    pub async fn run_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, TokenError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TokenError>>,
    {
        let metrics = get_metrics();
        let mut delay_ms = self.initial_delay_ms as f64;
        let mut attempt: u32 = 0;

        loop {
            metrics.fetch_attempts.inc();
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && self.should_retry(&e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay_ms as u64,
                        error = %e,
                        "token fetch attempt failed, retrying"
                    );
                    sleep(Duration::from_millis(delay_ms as u64)).await;
                    delay_ms = (delay_ms * self.factor).min(self.max_delay_ms as f64);
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts = attempt + 1, error = %e, "token fetch failed");
                    return Err(e);
                }
            }
        }
    }
}
