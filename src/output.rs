//! Records flowing through and out of the extraction pipeline.
//!
//! Inputs ([`Caption`]) come from the caption-detection collaborator;
//! intermediate records ([`RegionSpec`], [`RenderedImage`]) live for one
//! render→submit cycle; outputs ([`ExtractedTable`], [`VisionDetail`],
//! [`DocumentExtraction`]) are plain serialisable values handed to
//! persistence and reporting.

use crate::error::TableError;
use crate::geometry::BBox;
use serde::{Deserialize, Serialize};

// ── Inputs ───────────────────────────────────────────────────────────────

/// What a caption labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionKind {
    Table,
    Figure,
}

/// A detected "Table N" / "Figure N" caption block.
///
/// Captions for one page are expected in vertical order; the planner uses
/// each caption's successor as the lower boundary of its region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    #[serde(rename = "type")]
    pub kind: CaptionKind,
    /// Caption number as printed ("3", "A1", "S2").
    #[serde(default)]
    pub number: String,
    /// Full caption text from the PDF text layer.
    #[serde(default)]
    pub text: String,
    pub bbox: BBox,
    /// 1-indexed page number.
    pub page: usize,
}

impl Caption {
    pub fn is_table(&self) -> bool {
        self.kind == CaptionKind::Table
    }
}

// ── Intermediate records ─────────────────────────────────────────────────

/// A page region to be transcribed as one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub document_ref: String,
    /// 1-indexed page number.
    pub page_number: usize,
    pub bbox: BBox,
    pub table_id: String,
}

/// One encoded image of a region (or of one strip of it).
#[derive(Clone, PartialEq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl std::fmt::Debug for RenderedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedImage")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("media_type", &self.media_type)
            .finish()
    }
}

// ── Per-table state ──────────────────────────────────────────────────────

/// Lifecycle of one table through the orchestrator.
///
/// ```text
/// Planned → Rendered → Submitted → Parsed ─┬─────────────────────────────────────────────→ Done
///                                          └→ RecropPending → ReRendered → ReSubmitted → ReParsed → Done
/// ```
///
/// A render failure at either pass jumps straight to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableState {
    Planned,
    Rendered,
    Submitted,
    Parsed,
    RecropPending,
    ReRendered,
    ReSubmitted,
    ReParsed,
    Done,
}

// ── Outputs ──────────────────────────────────────────────────────────────

/// Final merged record for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub table_id: String,
    pub page: usize,
    /// Region that produced the kept answer (the recrop box when it won).
    pub bbox: BBox,
    pub table_label: String,
    /// Vision caption, else text-layer caption, else empty.
    pub caption: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub footnotes: String,
    pub is_incomplete: bool,
    pub incomplete_reason: Option<String>,
}

/// Audit record emitted for every table regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionDetail {
    pub table_id: String,
    pub page: usize,
    pub text_layer_caption: String,
    pub vision_caption: String,
    pub recropped: bool,
    pub parse_success: bool,
    /// Images sent on the first pass (more than one when split into strips).
    pub images: usize,
    pub recrop_bbox: Option<BBox>,
    pub final_state: TableState,
    pub error: Option<TableError>,
}

/// Why a caption produced no region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotATable,
    DegenerateRegion,
    PageOutOfRange,
}

/// A caption excluded from the vision pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCaption {
    pub page: usize,
    pub number: String,
    pub reason: SkipReason,
}

/// Aggregate counters for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub tables: usize,
    pub parse_failures: usize,
    pub recrops_attempted: usize,
    pub recrops_accepted: usize,
    pub images_rendered: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub render_duration_ms: u64,
    pub batch_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything extracted from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub document_ref: String,
    pub page_count: usize,
    pub tables: Vec<ExtractedTable>,
    /// One entry per table, in the same order as `tables`.
    pub vision_details: Vec<VisionDetail>,
    pub skipped_captions: Vec<SkippedCaption>,
    pub stats: ExtractionStats,
}

/// Result of one document within a corpus run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Extracted(DocumentExtraction),
    Failed { document_ref: String, error: String },
}

impl DocumentOutcome {
    pub fn document_ref(&self) -> &str {
        match self {
            DocumentOutcome::Extracted(d) => &d.document_ref,
            DocumentOutcome::Failed { document_ref, .. } => document_ref,
        }
    }

    /// The extraction, if the document could be processed.
    pub fn extraction(&self) -> Option<&DocumentExtraction> {
        match self {
            DocumentOutcome::Extracted(d) => Some(d),
            DocumentOutcome::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_deserialises_from_detector_json() {
        let json = r#"{"type":"table","number":"2","text":"Table 2: Results",
                       "bbox":{"x0":72.0,"top":100.0,"x1":300.0,"bottom":112.0},"page":4}"#;
        let cap: Caption = serde_json::from_str(json).unwrap();
        assert!(cap.is_table());
        assert_eq!(cap.page, 4);
        assert_eq!(cap.bbox.bottom, 112.0);
    }

    #[test]
    fn rendered_image_debug_hides_bytes() {
        let img = RenderedImage {
            bytes: vec![0; 1024],
            media_type: "image/png".into(),
        };
        let dbg = format!("{img:?}");
        assert!(dbg.contains("<1024 bytes>"));
    }

    #[test]
    fn failed_outcome_serialises_with_status_tag() {
        let o = DocumentOutcome::Failed {
            document_ref: "a.pdf".into(),
            error: "corrupt".into(),
        };
        let json = serde_json::to_string(&o).unwrap();
        assert!(json.contains(r#""status":"failed""#), "got: {json}");
        assert_eq!(o.document_ref(), "a.pdf");
        assert!(o.extraction().is_none());
    }
}
