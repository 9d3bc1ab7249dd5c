use log::warn;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{AttemptError, PipelineResult, TransientFailure};
use crate::services::cost::CostLedger;
use crate::services::extract::is_retry_sentinel;
use crate::services::llm::LlmClient;
use crate::services::retry::{cancellable, RetryPolicy};
use crate::services::shape::{NonEmptyText, ShapeContract};

/// The generative port wired to a retry policy, a cancellation token and,
/// optionally, a cost ledger. Every model call in the pipeline goes through
/// here.
#[derive(Clone)]
pub struct Generator {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    ledger: Option<Arc<CostLedger>>,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            llm,
            retry,
            cancel,
            ledger: None,
        }
    }

    pub fn with_cost_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn cost_ledger(&self) -> Option<&Arc<CostLedger>> {
        self.ledger.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs the structured response protocol: call, reject `RETRY`, parse
    /// against `contract`, retry transient failures with backoff.
    pub async fn request<C: ShapeContract>(
        &self,
        pass: &str,
        model_id: &str,
        prompt: &str,
        contract: &C,
    ) -> PipelineResult<C::Output> {
        self.retry
            .run(pass, model_id, &self.cancel, move |_| {
                self.attempt(model_id, prompt, contract)
            })
            .await
    }

    /// Free prose reply; only transport errors, `RETRY` and blank replies
    /// are retried.
    pub async fn complete_text(
        &self,
        pass: &str,
        model_id: &str,
        prompt: &str,
    ) -> PipelineResult<String> {
        self.request(pass, model_id, prompt, &NonEmptyText).await
    }

    async fn attempt<C: ShapeContract>(
        &self,
        model_id: &str,
        prompt: &str,
        contract: &C,
    ) -> Result<C::Output, AttemptError> {
        let reply = cancellable(&self.cancel, self.llm.complete(prompt, model_id))
            .await?
            .map_err(TransientFailure::Transport)?;

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(model_id, prompt, &reply).await {
                warn!("Failed to record cost in {}: {:#}", ledger.path(), e);
            }
        }

        if is_retry_sentinel(&reply) {
            return Err(TransientFailure::RetrySentinel.into());
        }
        contract
            .parse(&reply)
            .map_err(|e| TransientFailure::Shape(e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PipelineError;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::shape::ArcContract;
    use std::collections::HashMap;
    use std::time::Duration;

    fn generator(llm: Arc<ScriptedLlm>) -> Generator {
        let retry = RetryPolicy::new(3, Duration::ZERO, HashMap::new());
        Generator::new(llm, retry, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_sentinel_and_bad_shape_are_retried() {
        let llm = Arc::new(ScriptedLlm::queue(vec![
            "retry".to_string(),
            "[\"only one\"]".to_string(),
            "```json\n[\"One\", \"Two\"]\n```".to_string(),
        ]));
        let acts = generator(llm.clone())
            .request("define_arc", "m", "prompt", &ArcContract { acts: 2 })
            .await
            .unwrap();
        assert_eq!(acts, vec!["One", "Two"]);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_budget() {
        let llm = Arc::new(ScriptedLlm::new(|_, _| Err(anyhow::anyhow!("connection refused"))));
        let err = generator(llm.clone())
            .complete_text("build_prologue", "m", "prompt")
            .await
            .unwrap_err();
        match err {
            PipelineError::ValidationFailureExhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_makes_no_call() {
        let llm = Arc::new(ScriptedLlm::queue(vec!["text".to_string()]));
        let gen = generator(llm.clone());
        gen.cancel_token().cancel();
        let err = gen.complete_text("p", "m", "prompt").await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(llm.call_count(), 0);
    }

    /// A port whose calls never finish on their own.
    #[derive(Debug)]
    struct StalledLlm;

    #[async_trait::async_trait]
    impl LlmClient for StalledLlm {
        async fn complete(&self, _prompt: &str, _model_id: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_call() {
        let retry = RetryPolicy::new(3, Duration::ZERO, HashMap::new());
        let gen = Generator::new(Arc::new(StalledLlm), retry, CancellationToken::new());

        let token = gen.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            gen.complete_text("build_draft", "m", "prompt"),
        )
        .await
        .expect("cancellation should end the call promptly");
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
