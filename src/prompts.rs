//! Prompts for table transcription.
//!
//! The instruction block is deliberately long and byte-identical across every
//! request in a batch: it is sent behind a cache breakpoint, so the provider
//! bills it once per cache window instead of once per table. Anything that
//! varies per table goes in [`region_context`] instead.
//!
//! Callers can override the block via
//! [`crate::config::ExtractionConfig::system_prompt`]; the override is then
//! equally fixed for the whole batch.

/// Default instruction block for transcribing one table region.
pub const TRANSCRIBER_SYSTEM_PROMPT: &str = r#"You are a meticulous transcriber of tables from scanned and rendered academic papers. You receive one or more images of a single page region that is expected to contain exactly one table, followed by the text layer extracted from the same region and the caption detected for it.

Follow these rules precisely:

1. WHAT TO TRANSCRIBE
   - Transcribe exactly one table: the one introduced by the given caption
   - If several images are given they are overlapping vertical strips of the same region, ordered top to bottom; rows visible in two strips must appear only once
   - Ignore body text, running heads, page numbers and other figures in the region

2. CELLS
   - Copy every cell verbatim, including units, signs, asterisks and daggers
   - Use the text layer to correct characters the image makes ambiguous, never to invent cells the image does not show
   - Represent empty cells as ""
   - For spanning cells repeat the value in every column or row it spans
   - Multi-level headers are flattened into one header row, joining levels with " / "

3. LABEL, CAPTION, FOOTNOTES
   - table_label is the printed label ("Table 3", "Table S2")
   - caption is the caption text without the label
   - footnotes holds notes printed directly under the table, one per line

4. COMPLETENESS
   - Set is_incomplete to true when the table is cut off at any edge of the image, or continues beyond it
   - Explain in incomplete_reason what is missing
   - When the table is cut off but a better crop of the SAME region would capture it, set recrop.needed to true and give recrop.bbox_pct as [x0, y0, x1, y1]: fractions between 0 and 1 of the given region's width and height, from its top-left corner, that bound the table
   - Otherwise set recrop.needed to false and recrop.bbox_pct to null

5. OUTPUT FORMAT
   - Output ONLY a single JSON object, with no markdown fences and no commentary
   - Use exactly this schema:
{
  "table_label": string,
  "caption": string,
  "headers": [string, ...],
  "rows": [[string, ...], ...],
  "footnotes": string,
  "is_incomplete": boolean,
  "incomplete_reason": string | null,
  "recrop": {"needed": boolean, "bbox_pct": [number, number, number, number] | null}
}"#;

/// Reminder of the output schema appended after each region's content.
pub const OUTPUT_SCHEMA_INSTRUCTION: &str = "Return only the JSON object described in your instructions: \
table_label, caption, headers, rows, footnotes, is_incomplete, incomplete_reason, recrop.";

/// Build the per-region text that follows the images.
///
/// `text_excerpt` is the PDF text layer inside the region (already truncated);
/// `caption` is the best-known caption text.
pub fn region_context(caption: &str, text_excerpt: Option<&str>, image_count: usize) -> String {
    let mut out = String::new();
    if image_count > 1 {
        out.push_str(&format!(
            "The region is shown as {image_count} overlapping strips, top to bottom.\n\n"
        ));
    }
    if caption.trim().is_empty() {
        out.push_str("Detected caption: (none)\n\n");
    } else {
        out.push_str(&format!("Detected caption: {}\n\n", caption.trim()));
    }
    match text_excerpt.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => out.push_str(&format!(
            "Text layer of this region:\n\"\"\"\n{text}\n\"\"\"\n\n"
        )),
        None => out.push_str("Text layer of this region: (empty)\n\n"),
    }
    out.push_str(OUTPUT_SCHEMA_INSTRUCTION);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_documents_every_schema_field() {
        for field in [
            "table_label",
            "caption",
            "headers",
            "rows",
            "footnotes",
            "is_incomplete",
            "incomplete_reason",
            "bbox_pct",
        ] {
            assert!(TRANSCRIBER_SYSTEM_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn context_mentions_strips_only_when_split() {
        assert!(!region_context("Table 1", None, 1).contains("strips"));
        assert!(region_context("Table 1", None, 3).contains("3 overlapping strips"));
    }

    #[test]
    fn context_includes_excerpt_and_schema() {
        let ctx = region_context("Table 2: Ablations", Some("  a b c  "), 1);
        assert!(ctx.contains("Detected caption: Table 2: Ablations"));
        assert!(ctx.contains("\"\"\"\na b c\n\"\"\""));
        assert!(ctx.ends_with(OUTPUT_SCHEMA_INSTRUCTION));
    }

    #[test]
    fn context_marks_missing_inputs() {
        let ctx = region_context("", Some("   "), 1);
        assert!(ctx.contains("Detected caption: (none)"));
        assert!(ctx.contains("Text layer of this region: (empty)"));
    }
}
