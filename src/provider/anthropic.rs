//! Anthropic Message Batches client.
//!
//! Endpoints used:
//!
//! | Call    | Method + path                                  |
//! |---------|------------------------------------------------|
//! | submit  | `POST /v1/messages/batches`                    |
//! | status  | `GET  /v1/messages/batches/{id}`               |
//! | results | `GET  {results_url}` (JSONL, one entry a line) |
//! | cancel  | `POST /v1/messages/batches/{id}/cancel`        |
//!
//! The instruction block is sent as the `system` parameter with an
//! `ephemeral` cache-control marker, so every request after the first in a
//! batch reads it from the prompt cache.

use super::{BatchCounts, BatchHandle, BatchOutcome, BatchProvider, BatchStatus, TokenUsage};
use crate::error::PaperTabError;
use crate::pipeline::request::{ContentBlock, JobRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const PROVIDER_NAME: &str = "anthropic";
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// REST client for the Message Batches API.
pub struct AnthropicBatchClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicBatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBatchClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl AnthropicBatchClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, PaperTabError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| transport(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different host (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, PaperTabError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PaperTabError::BatchApi {
            status: status.as_u16(),
            message: api_error_message(&body),
        })
    }

    async fn fetch_batch(&self, handle: &BatchHandle) -> Result<MessageBatch, PaperTabError> {
        let response = self
            .send(self.http.get(self.url(&format!("/v1/messages/batches/{}", handle.0))))
            .await?;
        response.json().await.map_err(|e| protocol(e.to_string()))
    }
}

#[async_trait]
impl BatchProvider for AnthropicBatchClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn submit(&self, requests: &[JobRequest]) -> Result<BatchHandle, PaperTabError> {
        let body = CreateBatch {
            requests: requests.iter().map(to_wire).collect(),
        };
        let response = self
            .send(self.http.post(self.url("/v1/messages/batches")).json(&body))
            .await?;
        let batch: MessageBatch = response.json().await.map_err(|e| protocol(e.to_string()))?;
        debug!("created batch {} ({})", batch.id, batch.processing_status);
        Ok(BatchHandle(batch.id))
    }

    async fn status(&self, handle: &BatchHandle) -> Result<BatchStatus, PaperTabError> {
        let batch = self.fetch_batch(handle).await?;
        Ok(BatchStatus {
            ended: batch.processing_status == "ended",
            counts: batch.request_counts,
        })
    }

    async fn results(&self, handle: &BatchHandle) -> Result<HashMap<String, BatchOutcome>, PaperTabError> {
        let batch = self.fetch_batch(handle).await?;
        let Some(url) = batch.results_url else {
            warn!("batch {} has no results yet ({})", handle, batch.processing_status);
            return Ok(HashMap::new());
        };
        let body = self
            .send(self.http.get(url))
            .await?
            .text()
            .await
            .map_err(|e| transport(e.to_string()))?;
        Ok(parse_results_jsonl(&body))
    }

    async fn cancel(&self, handle: &BatchHandle) -> Result<(), PaperTabError> {
        self.send(
            self.http
                .post(self.url(&format!("/v1/messages/batches/{}/cancel", handle.0))),
        )
        .await?;
        Ok(())
    }
}

fn transport(detail: String) -> PaperTabError {
    PaperTabError::BatchTransport {
        provider: PROVIDER_NAME.to_string(),
        detail,
    }
}

fn protocol(detail: String) -> PaperTabError {
    PaperTabError::BatchProtocol {
        provider: PROVIDER_NAME.to_string(),
        detail,
    }
}

/// `error.message` of an API error body, or the body itself.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

// ── Wire types: requests ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateBatch {
    requests: Vec<WireRequest>,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    custom_id: String,
    params: WireParams,
}

#[derive(Debug, Serialize)]
struct WireParams {
    model: String,
    max_tokens: usize,
    temperature: f32,
    system: Vec<SystemBlock>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContent {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

fn to_wire(request: &JobRequest) -> WireRequest {
    let content = request
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Image {
                media_type,
                data_base64,
            } => WireContent::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: media_type.clone(),
                    data: data_base64.clone(),
                },
            },
            ContentBlock::Text { text } => WireContent::Text { text: text.clone() },
        })
        .collect();

    WireRequest {
        custom_id: request.custom_id.clone(),
        params: WireParams {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: vec![SystemBlock {
                kind: "text",
                text: request.instructions.text.clone(),
                cache_control: request
                    .instructions
                    .cache_breakpoint
                    .then_some(CacheControl { kind: "ephemeral" }),
            }],
            messages: vec![WireMessage {
                role: "user",
                content,
            }],
        },
    }
}

// ── Wire types: responses ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageBatch {
    id: String,
    processing_status: String,
    #[serde(default)]
    request_counts: BatchCounts,
    #[serde(default)]
    results_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    custom_id: String,
    result: Value,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

/// Decode a results file. Malformed lines are skipped; their entries are
/// then missing from the map.
fn parse_results_jsonl(body: &str) -> HashMap<String, BatchOutcome> {
    let mut out = HashMap::new();
    for (n, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ResultLine>(line) {
            Ok(entry) => {
                out.insert(entry.custom_id, outcome(&entry.result));
            }
            Err(e) => warn!("results line {}: skipped ({})", n + 1, e),
        }
    }
    out
}

fn outcome(result: &Value) -> BatchOutcome {
    match result.get("type").and_then(Value::as_str) {
        Some("succeeded") => {
            let message = result.get("message");
            // Concatenate every text block; non-text blocks are ignored.
            let text = message
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect::<String>()
                })
                .unwrap_or_default();
            let usage: WireUsage = message
                .and_then(|m| m.get("usage"))
                .and_then(|u| serde_json::from_value(u.clone()).ok())
                .unwrap_or_default();
            BatchOutcome::Succeeded {
                text,
                usage: TokenUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
                    cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
                },
            }
        }
        Some("canceled") => BatchOutcome::Canceled,
        Some("expired") => BatchOutcome::Expired,
        _ => BatchOutcome::Errored {
            message: result
                .pointer("/error/error/message")
                .or_else(|| result.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use crate::output::{RegionSpec, RenderedImage};
    use crate::pipeline::request::RequestBuilder;

    fn job() -> JobRequest {
        RequestBuilder::new("SYSTEM", "claude-sonnet-4-20250514", 8192, 0.0).build(
            &RegionSpec {
                document_ref: "doc".into(),
                page_number: 3,
                bbox: BBox::new(0.0, 10.0, 600.0, 400.0),
                table_id: "doc_p3_t2".into(),
            },
            &[RenderedImage {
                bytes: vec![1, 2, 3],
                media_type: "image/png".into(),
            }],
            Some("excerpt"),
            "Table 2: Results",
        )
    }

    #[test]
    fn request_wire_shape() {
        let wire = serde_json::to_value(to_wire(&job())).unwrap();
        assert_eq!(wire["custom_id"], "doc_p3_t2__transcriber");
        let params = &wire["params"];
        assert_eq!(params["max_tokens"], 8192);
        assert_eq!(params["system"][0]["type"], "text");
        assert_eq!(params["system"][0]["text"], "SYSTEM");
        assert_eq!(params["system"][0]["cache_control"]["type"], "ephemeral");

        let content = &params["messages"][0]["content"];
        assert_eq!(params["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["type"], "base64");
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[0]["source"]["data"], "AQID");
        assert_eq!(content[1]["type"], "text");
        assert!(content[1]["text"].as_str().unwrap().contains("Table 2: Results"));
    }

    #[test]
    fn cache_control_omitted_without_breakpoint() {
        let mut request = job();
        request.instructions.cache_breakpoint = false;
        let wire = serde_json::to_value(to_wire(&request)).unwrap();
        assert!(wire["params"]["system"][0].get("cache_control").is_none());
    }

    #[test]
    fn results_jsonl_decodes_every_outcome() {
        let body = concat!(
            r#"{"custom_id":"a__transcriber","result":{"type":"succeeded","message":{"content":[{"type":"text","text":"{\"headers\":"},{"type":"text","text":"[]}"}],"usage":{"input_tokens":1200,"output_tokens":80,"cache_read_input_tokens":3000}}}}"#,
            "\n",
            r#"{"custom_id":"b__transcriber","result":{"type":"errored","error":{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}}}"#,
            "\n\n",
            r#"{"custom_id":"c__transcriber","result":{"type":"canceled"}}"#,
            "\n",
            r#"{"custom_id":"d__transcriber","result":{"type":"expired"}}"#,
            "\n",
            "garbage line\n",
        );
        let map = parse_results_jsonl(body);
        assert_eq!(map.len(), 4);
        assert_eq!(
            map["a__transcriber"],
            BatchOutcome::Succeeded {
                text: "{\"headers\":[]}".into(),
                usage: TokenUsage {
                    input_tokens: 1200,
                    output_tokens: 80,
                    cache_read_tokens: 3000,
                    cache_creation_tokens: 0,
                },
            }
        );
        assert_eq!(
            map["b__transcriber"],
            BatchOutcome::Errored {
                message: "Overloaded".into()
            }
        );
        assert_eq!(map["c__transcriber"], BatchOutcome::Canceled);
        assert_eq!(map["d__transcriber"], BatchOutcome::Expired);
    }

    #[test]
    fn batch_status_decodes() {
        let raw = r#"{
            "id": "msgbatch_01",
            "type": "message_batch",
            "processing_status": "in_progress",
            "request_counts": {"processing": 3, "succeeded": 1, "errored": 0, "canceled": 0, "expired": 0},
            "results_url": null
        }"#;
        let batch: MessageBatch = serde_json::from_str(raw).unwrap();
        assert_eq!(batch.id, "msgbatch_01");
        assert_eq!(batch.request_counts.processing, 3);
        assert!(batch.results_url.is_none());
    }

    #[test]
    fn api_error_message_prefers_structured_body() {
        assert_eq!(
            api_error_message(r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad model"}}"#),
            "bad model"
        );
        assert_eq!(api_error_message(" upstream timeout \n"), "upstream timeout");
    }

    #[test]
    fn debug_redacts_key() {
        let client = AnthropicBatchClient::new("sk-secret").unwrap().with_base_url("http://localhost:9/");
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("http://localhost:9"));
    }
}
