//! Batch adapter over a synchronous `edgequake-llm` chat provider.
//!
//! `submit` answers every request immediately, up to `concurrency` in
//! flight, and stores the outcomes under a local batch id; `status` then
//! reports the job as ended and `results` hands the outcomes over once.
//! Transient failures are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`); a request that exhausts its retries
//! becomes [`BatchOutcome::Errored`] rather than failing the whole job.

use super::{BatchCounts, BatchHandle, BatchOutcome, BatchProvider, BatchStatus, TokenUsage};
use crate::config::ExtractionConfig;
use crate::error::PaperTabError;
use crate::pipeline::request::{ContentBlock, JobRequest};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Upper bound on a single retry wait.
const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Wait before retry `attempt` (1-based): `base_ms * 2^(attempt-1)`, capped.
fn retry_backoff(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_RETRY_BACKOFF_MS)
}

/// Provider without a batch endpoint, driven as if it had one.
pub struct ChatBatchProvider {
    llm: Arc<dyn LLMProvider>,
    name: String,
    concurrency: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    next_id: AtomicU64,
    finished: Mutex<HashMap<String, HashMap<String, BatchOutcome>>>,
}

impl ChatBatchProvider {
    pub fn new(llm: Arc<dyn LLMProvider>, name: impl Into<String>, config: &ExtractionConfig) -> Self {
        Self {
            llm,
            name: name.into(),
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            next_id: AtomicU64::new(1),
            finished: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a chat provider from the environment.
    ///
    /// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` together select an explicit
    /// provider; otherwise [`ProviderFactory::from_env`] auto-detects one.
    pub fn from_env(config: &ExtractionConfig) -> Result<Self, PaperTabError> {
        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                let llm = ProviderFactory::create_llm_provider(&prov, &model).map_err(|e| {
                    PaperTabError::ProviderNotConfigured {
                        provider: prov.clone(),
                        hint: format!("{e}"),
                    }
                })?;
                return Ok(Self::new(llm, prov, config));
            }
        }

        let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| PaperTabError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be detected from the environment.\n\
                Set ANTHROPIC_API_KEY for the batch API, or EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL.\n\
                Error: {}",
                e
            ),
        })?;
        Ok(Self::new(llm, "auto", config))
    }

    async fn answer(&self, request: &JobRequest) -> BatchOutcome {
        let messages = to_messages(request);
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    request.custom_id, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.llm.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        request.custom_id, response.prompt_tokens, response.completion_tokens
                    );
                    return BatchOutcome::Succeeded {
                        text: response.content,
                        usage: TokenUsage {
                            input_tokens: response.prompt_tokens as u64,
                            output_tokens: response.completion_tokens as u64,
                            ..Default::default()
                        },
                    };
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    warn!("{}: attempt {} failed — {}", request.custom_id, attempt + 1, msg);
                    last_err = Some(msg);
                }
            }
        }

        BatchOutcome::Errored {
            message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        }
    }
}

/// System message with the instruction block, then one user turn holding
/// every image in order and the joined text blocks.
fn to_messages(request: &JobRequest) -> Vec<ChatMessage> {
    let mut images = Vec::new();
    let mut texts = Vec::new();
    for block in &request.content {
        match block {
            ContentBlock::Image {
                media_type,
                data_base64,
            } => images.push(ImageData::new(data_base64.clone(), media_type.clone()).with_detail("high")),
            ContentBlock::Text { text } => texts.push(text.as_str()),
        }
    }
    vec![
        ChatMessage::system(request.instructions.text.clone()),
        ChatMessage::user_with_images(texts.join("\n\n"), images),
    ]
}

fn counts(outcomes: &HashMap<String, BatchOutcome>) -> BatchCounts {
    let mut counts = BatchCounts::default();
    for outcome in outcomes.values() {
        match outcome {
            BatchOutcome::Succeeded { .. } => counts.succeeded += 1,
            BatchOutcome::Errored { .. } => counts.errored += 1,
            BatchOutcome::Canceled => counts.canceled += 1,
            BatchOutcome::Expired => counts.expired += 1,
        }
    }
    counts
}

#[async_trait]
impl BatchProvider for ChatBatchProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, requests: &[JobRequest]) -> Result<BatchHandle, PaperTabError> {
        let pending: Vec<_> = requests
            .iter()
            .map(|request| async move { (request.custom_id.clone(), self.answer(request).await) })
            .collect();
        let outcomes: HashMap<String, BatchOutcome> = stream::iter(pending)
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.finished
            .lock()
            .map_err(|_| PaperTabError::Internal("chat batch store poisoned".into()))?
            .insert(id.clone(), outcomes);
        Ok(BatchHandle(id))
    }

    async fn status(&self, handle: &BatchHandle) -> Result<BatchStatus, PaperTabError> {
        let finished = self
            .finished
            .lock()
            .map_err(|_| PaperTabError::Internal("chat batch store poisoned".into()))?;
        let outcomes = finished.get(&handle.0).ok_or_else(|| PaperTabError::BatchProtocol {
            provider: self.name.clone(),
            detail: format!("unknown batch '{}'", handle),
        })?;
        Ok(BatchStatus {
            ended: true,
            counts: counts(outcomes),
        })
    }

    async fn results(&self, handle: &BatchHandle) -> Result<HashMap<String, BatchOutcome>, PaperTabError> {
        let mut finished = self
            .finished
            .lock()
            .map_err(|_| PaperTabError::Internal("chat batch store poisoned".into()))?;
        finished.remove(&handle.0).ok_or_else(|| PaperTabError::BatchProtocol {
            provider: self.name.clone(),
            detail: format!("unknown batch '{}'", handle),
        })
    }

    async fn cancel(&self, _handle: &BatchHandle) -> Result<(), PaperTabError> {
        Ok(())
    }
}
