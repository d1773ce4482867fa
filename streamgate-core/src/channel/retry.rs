use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::EngineSection;
use crate::engine::{EngineError, EngineResult};

/// Bounded exponential backoff around the engine call. Deterministic delays
/// are non-decreasing and capped; jitter never pushes a delay past the cap.
#[derive(Debug, Clone)]
pub struct RetryEnvelope {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryEnvelope {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter,
        }
    }

    pub fn from_engine_config(config: &EngineSection) -> Self {
        Self::new(
            config.max_provision_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
            config.retry_jitter,
        )
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt via a checked shift so large attempt values saturate.
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exponential = self.base_delay.checked_mul(factor).unwrap_or(self.max_delay);
        let capped = exponential.min(self.max_delay);
        if !self.jitter {
            return capped;
        }
        let headroom = self.max_delay.saturating_sub(capped);
        let ceiling_ms = (self.base_delay / 2).min(headroom).as_millis() as u64;
        if ceiling_ms == 0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..ceiling_ms);
        capped + Duration::from_millis(jitter)
    }

    /// Runs `operation` until it succeeds, fails terminally, exhausts the
    /// retry budget, or the caller cancels. Only retryable engine errors
    /// re-enter the loop.
    pub async fn run<F, Fut, T>(
        &self,
        stage: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> EngineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() || attempt >= self.max_retries => {
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        stage,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient engine failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
