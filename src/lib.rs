//! # papertab
//!
//! Extract tables from academic-paper PDFs with a vision language model.
//!
//! ## Why this crate?
//!
//! Text-layer table extractors break on the tables papers actually contain:
//! merged headers, rotated labels, ±-annotated cells, scanned pages with no
//! text layer at all. This crate instead crops each captioned table region,
//! renders it at an adaptive resolution, and asks a vision model to
//! transcribe the grid into a strict JSON schema. When the model reports
//! that the crop cut the table off, the region is re-rendered once with the
//! model's suggested box.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + captions
//!  │
//!  ├─ 1. Plan     caption anchors → full-width regions below each caption
//!  ├─ 2. Render   adaptive DPI via pdfium (spawn_blocking), tall regions → strips
//!  ├─ 3. Request  one batch request per region, cached instruction block
//!  ├─ 4. Batch    one provider batch job, polled with backoff until done
//!  ├─ 5. Parse    strict JSON decode → Success | Failure
//!  ├─ 6. Recrop   at most one tighter re-render, in a second batch
//!  └─ 7. Merge    caption resolution, cell cleanup, audit records
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use papertab::{extract_pdf, Caption, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Captions come from an upstream caption detector.
//!     let captions: Vec<Caption> = serde_json::from_str(&std::fs::read_to_string("captions.json")?)?;
//!     // Provider resolved from ANTHROPIC_API_KEY (batch API) or edgequake-llm env vars
//!     let config = ExtractionConfig::default();
//!     let doc = extract_pdf("paper.pdf", captions, &config).await?;
//!     for table in &doc.tables {
//!         println!("{} — {} rows", table.table_id, table.rows.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `papertab` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! papertab = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, RenderSettings, DEFAULT_MODEL};
pub use error::{PaperTabError, TableError};
pub use extract::{extract_corpus, extract_document, extract_pdf, extract_to_file, inspect, DocumentJob};
pub use geometry::{BBox, PageSize};
pub use output::{
    Caption, CaptionKind, DocumentExtraction, DocumentOutcome, ExtractedTable, ExtractionStats, RegionSpec,
    RenderedImage, SkipReason, SkippedCaption, TableState, VisionDetail,
};
pub use pipeline::normalize::{CellNormalizer, TextCleaner};
pub use pipeline::parse::{parse, ParsedResult, RecropSignal, TableAnswer};
pub use pipeline::request::{ContentBlock, InstructionBlock, JobRequest};
pub use progress::{BatchPass, ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use provider::{
    AnthropicBatchClient, BatchCounts, BatchHandle, BatchOutcome, BatchProvider, BatchStatus, ChatBatchProvider,
    TokenUsage,
};
pub use source::{PdfSource, PdfiumSource, RasterClip};
