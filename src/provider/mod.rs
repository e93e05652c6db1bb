//! Vision-provider batch protocol.
//!
//! A batch job is N [`JobRequest`]s submitted together; the provider works
//! through them server-side and, once the job has ended, yields a mapping
//! `custom_id → outcome`. Absence of an expected key is a normal outcome
//! (an entry dropped or left unfinished at the deadline), not a protocol
//! error.
//!
//! Two implementations ship with the crate:
//!
//! * [`anthropic::AnthropicBatchClient`] — the Message Batches REST API,
//!   with the instruction block behind a prompt-cache breakpoint.
//! * [`chat::ChatBatchProvider`] — wraps any `edgequake-llm` vision provider
//!   and answers the "batch" synchronously, for providers without a batch
//!   endpoint.

pub mod anthropic;
pub mod chat;

use crate::config::ExtractionConfig;
use crate::error::PaperTabError;
use crate::pipeline::request::JobRequest;
use crate::progress::BatchPass;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use anthropic::AnthropicBatchClient;
pub use chat::ChatBatchProvider;

/// Provider-assigned identifier of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchHandle(pub String);

impl std::fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-entry progress counters reported while polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub processing: u64,
    pub succeeded: u64,
    pub errored: u64,
    pub canceled: u64,
    pub expired: u64,
}

/// Snapshot of a batch's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatus {
    /// No further entries will complete.
    pub ended: bool,
    pub counts: BatchCounts,
}

/// Token accounting for one answered request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.cache_read_tokens += rhs.cache_read_tokens;
        self.cache_creation_tokens += rhs.cache_creation_tokens;
    }
}

/// What the provider returned for one `custom_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchOutcome {
    Succeeded { text: String, usage: TokenUsage },
    Errored { message: String },
    Canceled,
    Expired,
}

/// A provider that accepts batch jobs.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Submit all `requests` as one job.
    async fn submit(&self, requests: &[JobRequest]) -> Result<BatchHandle, PaperTabError>;

    /// Current state of a submitted job.
    async fn status(&self, handle: &BatchHandle) -> Result<BatchStatus, PaperTabError>;

    /// Outcomes available for a job, keyed by `custom_id`.
    async fn results(&self, handle: &BatchHandle) -> Result<HashMap<String, BatchOutcome>, PaperTabError>;

    /// Ask the provider to stop working on a job.
    async fn cancel(&self, handle: &BatchHandle) -> Result<(), PaperTabError>;
}

/// Submit `requests` as one batch and block until it ends or the deadline passes.
///
/// Polls with a doubling delay starting at `poll_interval_ms` and capped at
/// `max_poll_interval_ms`. At the deadline the job is cancelled (best-effort)
/// and whatever results exist are returned; entries without a result are
/// simply absent from the map.
///
/// # Errors
/// Only submission failures and a failed final result download are returned;
/// a failing status poll is logged and retried on the next tick.
pub async fn run_batch(
    provider: &dyn BatchProvider,
    requests: &[JobRequest],
    config: &ExtractionConfig,
    pass: BatchPass,
) -> Result<HashMap<String, BatchOutcome>, PaperTabError> {
    if requests.is_empty() {
        return Ok(HashMap::new());
    }

    let handle = provider.submit(requests).await?;
    info!(
        "{} batch {} submitted to {}: {} requests",
        pass,
        handle,
        provider.name(),
        requests.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_submitted(pass, requests.len());
    }

    let start = Instant::now();
    let deadline = Duration::from_secs(config.batch_timeout_secs);
    let max_delay = config.max_poll_interval_ms.max(config.poll_interval_ms);
    let mut delay = config.poll_interval_ms;

    loop {
        match provider.status(&handle).await {
            Ok(status) => {
                debug!("{} batch {}: {:?}", pass, handle, status.counts);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_batch_polled(pass, &status.counts);
                }
                if status.ended {
                    break;
                }
            }
            Err(e) => warn!("{} batch {}: status poll failed — {}", pass, handle, e),
        }

        let elapsed = start.elapsed();
        if elapsed >= deadline {
            warn!(
                "{} batch {} still running after {}s; cancelling and collecting partial results",
                pass,
                handle,
                elapsed.as_secs()
            );
            if let Err(e) = provider.cancel(&handle).await {
                warn!("{} batch {}: cancel failed — {}", pass, handle, e);
            }
            wait_for_cancel(provider, &handle, config.poll_interval_ms).await;
            break;
        }

        let remaining = deadline.saturating_sub(elapsed);
        sleep(Duration::from_millis(delay).min(remaining)).await;
        delay = (delay.saturating_mul(2)).min(max_delay);
    }

    let results = provider.results(&handle).await?;
    info!(
        "{} batch {} ended: {}/{} results in {}ms",
        pass,
        handle,
        results.len(),
        requests.len(),
        start.elapsed().as_millis()
    );
    Ok(results)
}

/// Status polls allowed after a cancel before results are fetched regardless.
const CANCEL_GRACE_POLLS: u32 = 5;

/// Give a cancelled job a few polls to reach `ended` so its partial results
/// become downloadable.
async fn wait_for_cancel(provider: &dyn BatchProvider, handle: &BatchHandle, interval_ms: u64) {
    for _ in 0..CANCEL_GRACE_POLLS {
        if let Ok(status) = provider.status(handle).await {
            if status.ended {
                return;
            }
        }
        sleep(Duration::from_millis(interval_ms)).await;
    }
}

/// Resolve the batch provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **`ANTHROPIC_API_KEY`** — the Message Batches client.
/// 3. **`edgequake-llm` auto-detection** — any vision chat provider found in
///    the environment, wrapped in [`ChatBatchProvider`].
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn BatchProvider>, PaperTabError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        if !key.is_empty() {
            let mut client = AnthropicBatchClient::new(key)?;
            if let Ok(base) = std::env::var("ANTHROPIC_BASE_URL") {
                if !base.is_empty() {
                    client = client.with_base_url(base);
                }
            }
            return Ok(Arc::new(client));
        }
    }

    let chat = ChatBatchProvider::from_env(config)?;
    Ok(Arc::new(chat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Ends after `polls_until_end` status calls; never ends when `None`.
    struct ScriptedProvider {
        polls_until_end: Option<usize>,
        polls: AtomicUsize,
        cancels: AtomicUsize,
        results: Mutex<HashMap<String, BatchOutcome>>,
    }

    impl ScriptedProvider {
        fn new(polls_until_end: Option<usize>) -> Self {
            let mut results = HashMap::new();
            results.insert(
                "a__transcriber".to_string(),
                BatchOutcome::Succeeded {
                    text: "{}".into(),
                    usage: TokenUsage::default(),
                },
            );
            Self {
                polls_until_end,
                polls: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                results: Mutex::new(results),
            }
        }
    }

    #[async_trait]
    impl BatchProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, _requests: &[JobRequest]) -> Result<BatchHandle, PaperTabError> {
            Ok(BatchHandle("batch-1".into()))
        }

        async fn status(&self, _handle: &BatchHandle) -> Result<BatchStatus, PaperTabError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(BatchStatus {
                ended: self.polls_until_end.is_some_and(|limit| n >= limit),
                counts: BatchCounts::default(),
            })
        }

        async fn results(&self, _handle: &BatchHandle) -> Result<HashMap<String, BatchOutcome>, PaperTabError> {
            Ok(self.results.lock().unwrap().clone())
        }

        async fn cancel(&self, _handle: &BatchHandle) -> Result<(), PaperTabError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn request() -> JobRequest {
        crate::pipeline::request::RequestBuilder::new("sys", "m", 16, 0.0).build(
            &crate::output::RegionSpec {
                document_ref: "d".into(),
                page_number: 1,
                bbox: crate::geometry::BBox::new(0.0, 0.0, 1.0, 1.0),
                table_id: "a".into(),
            },
            &[],
            None,
            "",
        )
    }

    fn fast_config(timeout_secs: u64) -> ExtractionConfig {
        ExtractionConfig::builder()
            .poll_interval_ms(1)
            .max_poll_interval_ms(4)
            .batch_timeout_secs(timeout_secs)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn polls_until_ended() {
        let provider = ScriptedProvider::new(Some(3));
        let results = run_batch(&provider, &[request()], &fast_config(60), BatchPass::First)
            .await
            .unwrap();
        assert_eq!(provider.polls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.cancels.load(Ordering::SeqCst), 0);
        assert!(results.contains_key("a__transcriber"));
    }

    #[tokio::test]
    async fn deadline_cancels_and_returns_partial_results() {
        let provider = ScriptedProvider::new(None);
        let results = run_batch(&provider, &[request()], &fast_config(0), BatchPass::Recrop)
            .await
            .unwrap();
        assert_eq!(provider.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn empty_batch_is_not_submitted() {
        let provider = ScriptedProvider::new(Some(1));
        let results = tokio_test::block_on(run_batch(&provider, &[], &fast_config(60), BatchPass::First)).unwrap();
        assert!(results.is_empty());
        assert_eq!(provider.polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cache_read_tokens: 100,
            cache_creation_tokens: 0,
        };
        total += TokenUsage {
            input_tokens: 1,
            output_tokens: 1,
            cache_read_tokens: 0,
            cache_creation_tokens: 7,
        };
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.cache_read_tokens, 100);
        assert_eq!(total.cache_creation_tokens, 7);
    }
}
