//! Extraction client: one batch in, one [`ExtractionResult`] out.
//!
//! The client renders the batch, sends it to the [`VisionModel`] under a
//! per-request timeout and consults the [`RetryPolicy`] after every failure.
//! It never returns an error: whatever happens ends up in the result's status,
//! so a single bad batch cannot take the document down with it.

use crate::config::PipelineConfig;
use crate::error::{BatchFailure, ErrorKind};
use crate::pipeline::llm::{VisionModel, VisionRequest};
use crate::pipeline::postprocess::normalise_batch_text;
use crate::pipeline::retry::{RetryDecision, RetryPolicy};
use crate::pipeline::source::{BatchId, PageBatch, PageRange};
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    Failed,
}

/// Outcome of extracting one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub batch_id: BatchId,
    pub pages: PageRange,
    pub status: BatchStatus,
    /// Normalised text with page markers; `Some` iff `status == Success`.
    pub text: Option<String>,
    /// Last failure; `Some` iff `status == Failed`.
    pub error: Option<BatchFailure>,
    /// Model calls made, 0 when the pages could not be rendered.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Sends page batches to a vision model with retry and timeout.
#[derive(Clone)]
pub struct ExtractionClient {
    model: Arc<dyn VisionModel>,
    policy: RetryPolicy,
    timeout: Duration,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: usize,
}

impl ExtractionClient {
    pub fn new(model: Arc<dyn VisionModel>, config: &PipelineConfig) -> Self {
        Self {
            model,
            policy: RetryPolicy::from_config(config),
            timeout: config.api_timeout,
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Extract the text of `batch`. Always yields a result.
    pub async fn extract(&self, batch: &PageBatch) -> ExtractionResult {
        let start = Instant::now();

        let images = match batch.render().await {
            Ok(images) => images,
            Err(failure) => {
                warn!("Batch {} {}: render failed: {}", batch.id, batch.range, failure);
                return self.failed(batch, failure, 0, start);
            }
        };

        let request = VisionRequest {
            prompt: prompts::system_prompt(self.system_prompt.as_deref(), batch.range.len()),
            instruction: prompts::user_instruction(batch.range.first, batch.range.last),
            images,
            max_output_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, self.model.extract(&request)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(BatchFailure::new(
                    ErrorKind::Timeout,
                    format!("no response within {:?}", self.timeout),
                )),
            };

            match outcome {
                Ok(raw) => {
                    if raw.trim().is_empty() {
                        warn!(
                            "Batch {} {}: model returned no text, recording blank page(s)",
                            batch.id, batch.range
                        );
                    }
                    debug!(
                        "Batch {} {}: {} chars after {} attempt(s)",
                        batch.id,
                        batch.range,
                        raw.len(),
                        attempt
                    );
                    return ExtractionResult {
                        batch_id: batch.id,
                        pages: batch.range,
                        status: BatchStatus::Success,
                        text: Some(normalise_batch_text(batch.range, &raw)),
                        error: None,
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                    };
                }
                Err(failure) => match self.policy.decide(failure.kind, attempt) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            "Batch {} {}: attempt {}/{} failed ({}), retrying in {:?}",
                            batch.id,
                            batch.range,
                            attempt,
                            self.policy.max_attempts(),
                            failure,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        warn!(
                            "Batch {} {}: giving up after {} attempt(s): {}",
                            batch.id, batch.range, attempt, failure
                        );
                        return self.failed(batch, failure, attempt, start);
                    }
                },
            }
        }
    }

    fn failed(
        &self,
        batch: &PageBatch,
        failure: BatchFailure,
        attempts: u32,
        start: Instant,
    ) -> ExtractionResult {
        ExtractionResult {
            batch_id: batch.id,
            pages: batch.range,
            status: BatchStatus::Failed,
            text: None,
            error: Some(failure),
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::{DocumentSource, PageSource};
    use async_trait::async_trait;
    use edgequake_llm::ImageData;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    struct Doc {
        pages: usize,
        broken: bool,
    }

    #[async_trait]
    impl DocumentSource for Doc {
        fn path(&self) -> &Path {
            Path::new("doc.pdf")
        }

        fn page_count(&self) -> usize {
            self.pages
        }

        async fn render(&self, range: PageRange) -> Result<Vec<ImageData>, BatchFailure> {
            if self.broken {
                return Err(BatchFailure::new(ErrorKind::Malformed, "bad page"));
            }
            Ok(range
                .pages()
                .map(|_| ImageData::new(String::new(), "image/png"))
                .collect())
        }
    }

    /// Replays a script of responses, then repeats the last one.
    struct Scripted {
        script: Mutex<VecDeque<Result<String, BatchFailure>>>,
        calls: Mutex<Vec<VisionRequest>>,
        stall: bool,
    }

    impl Scripted {
        fn new(script: Vec<Result<String, BatchFailure>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                stall: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VisionModel for Scripted {
        async fn extract(&self, request: &VisionRequest) -> Result<String, BatchFailure> {
            self.calls.lock().unwrap().push(request.clone());
            if self.stall {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn config(max_retries: u32) -> PipelineConfig {
        PipelineConfig::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(0.0)
            .build()
            .unwrap()
    }

    fn first_batch(pages: usize, batch_size: usize, broken: bool) -> PageBatch {
        PageSource::new(Arc::new(Doc { pages, broken }), batch_size)
            .unwrap()
            .batches()
            .next()
            .unwrap()
    }

    fn fail(kind: ErrorKind) -> Result<String, BatchFailure> {
        Err(BatchFailure::new(kind, "scripted"))
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let model = Scripted::new(vec![Ok("Hello".into())]);
        let client = ExtractionClient::new(model.clone(), &config(3));
        let result = client.extract(&first_batch(1, 1, false)).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.text.as_deref(), Some("=== PAGE 1 ===\nHello\n"));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limited_twice_then_success() {
        let model = Scripted::new(vec![
            fail(ErrorKind::RateLimited),
            fail(ErrorKind::RateLimited),
            Ok("Text".into()),
        ]);
        let client = ExtractionClient::new(model.clone(), &config(5));
        let result = client.extract(&first_batch(1, 1, false)).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn outage_uses_whole_budget() {
        let model = Scripted::new(vec![fail(ErrorKind::ServiceUnavailable)]);
        let client = ExtractionClient::new(model.clone(), &config(4));
        let result = client.extract(&first_batch(1, 1, false)).await;
        assert_eq!(result.status, BatchStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::ServiceUnavailable));
        assert_eq!(result.attempts, 4);
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let model = Scripted::new(vec![fail(ErrorKind::ClientError)]);
        let client = ExtractionClient::new(model.clone(), &config(4));
        let result = client.extract(&first_batch(1, 1, false)).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ClientError));
        assert_eq!(result.attempts, 1);
        assert!(result.text.is_none());
    }

    #[tokio::test]
    async fn render_failure_makes_no_model_call() {
        let model = Scripted::new(vec![Ok("unused".into())]);
        let client = ExtractionClient::new(model.clone(), &config(3));
        let result = client.extract(&first_batch(2, 2, true)).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Malformed));
        assert_eq!(result.attempts, 0);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let model = Arc::new(Scripted {
            script: Mutex::new(vec![Ok("late".to_string())].into()),
            calls: Mutex::new(Vec::new()),
            stall: true,
        });
        let config = PipelineConfig::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(1))
            .jitter(0.0)
            .api_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let client = ExtractionClient::new(model.clone(), &config);
        let result = client.extract(&first_batch(1, 1, false)).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn empty_response_is_a_blank_page() {
        let model = Scripted::new(vec![Ok("  \n".into())]);
        let client = ExtractionClient::new(model, &config(3));
        let result = client.extract(&first_batch(1, 1, false)).await;
        assert!(result.is_success());
        assert_eq!(result.text.as_deref(), Some("=== PAGE 1 ===\n\n"));
    }

    #[tokio::test]
    async fn multi_page_request_names_every_page() {
        let model = Scripted::new(vec![Ok("=== PAGE 1 ===\nA\n=== PAGE 2 ===\nB".into())]);
        let client = ExtractionClient::new(model.clone(), &config(3));
        let result = client.extract(&first_batch(3, 2, false)).await;
        assert_eq!(
            result.text.as_deref(),
            Some("=== PAGE 1 ===\nA\n\n=== PAGE 2 ===\nB\n")
        );

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].images.len(), 2);
        assert!(calls[0].instruction.contains("1, 2"));
        assert!(calls[0].prompt.contains("PAGE BOUNDARIES"));
    }
}
