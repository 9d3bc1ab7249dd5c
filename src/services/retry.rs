use log::warn;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::config::RetryConfig;
use crate::core::error::{AttemptError, PipelineError, PipelineResult};

/// Model-specific attempt budget and linear backoff, injected at construction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    default_max: u32,
    backoff_step: Duration,
    models: HashMap<String, u32>,
}

impl RetryPolicy {
    pub fn new(default_max: u32, backoff_step: Duration, models: HashMap<String, u32>) -> Self {
        Self {
            default_max,
            backoff_step,
            models,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.default_max_retries,
            Duration::from_secs(config.backoff_step_seconds),
            config.models.clone(),
        )
    }

    /// Attempts allowed for `model_id`; never less than one.
    pub fn max_retries(&self, model_id: &str) -> u32 {
        self.models
            .get(model_id)
            .copied()
            .unwrap_or(self.default_max)
            .max(1)
    }

    /// Wait after the failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Runs `op` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. Transient failures are
    /// logged and followed by a cancellable backoff; no wait follows the
    /// final attempt.
    pub async fn run<T, F, Fut>(
        &self,
        pass: &str,
        model_id: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> PipelineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max = self.max_retries(model_id);
        let mut last_error = String::from("no attempt was made");

        for attempt in 1..=max {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(failure)) => {
                    warn!("{} attempt {}/{} failed: {}", pass, attempt, max, failure);
                    last_error = failure.to_string();
                    if attempt < max {
                        sleep(cancel, self.backoff_delay(attempt)).await?;
                    }
                }
            }
        }

        Err(PipelineError::ValidationFailureExhausted {
            pass: pass.to_string(),
            attempts: max,
            last_error,
        })
    }
}

/// Resolves `fut` unless the token fires first.
pub async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> PipelineResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        out = fut => Ok(out),
    }
}

pub async fn sleep(cancel: &CancellationToken, duration: Duration) -> PipelineResult<()> {
    if duration.is_zero() {
        return Ok(());
    }
    cancellable(cancel, tokio::time::sleep(duration)).await
}
