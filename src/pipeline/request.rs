//! Batch request assembly: one provider-neutral [`JobRequest`] per region.
//!
//! Every request carries the same fixed instruction block, flagged as a cache
//! breakpoint, followed by the region's images (top to bottom) and a text
//! block with the caption, text-layer excerpt and schema reminder. Provider
//! clients translate this into their own wire format.

use crate::output::{RegionSpec, RenderedImage};
use crate::pipeline::encode;
use crate::prompts::region_context;
use serde::{Deserialize, Serialize};

/// Suffix appended to a table id to form its batch `custom_id`.
pub const CUSTOM_ID_SUFFIX: &str = "__transcriber";

/// `custom_id` for a table. Results are matched back by exact lookup on it.
pub fn custom_id(table_id: &str) -> String {
    format!("{table_id}{CUSTOM_ID_SUFFIX}")
}

/// The fixed instruction block shared by all requests of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionBlock {
    pub text: String,
    /// Ask the provider to cache everything up to and including this block.
    pub cache_breakpoint: bool,
}

/// One ordered piece of per-region content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Image { media_type: String, data_base64: String },
    Text { text: String },
}

/// A single request inside a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub custom_id: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub instructions: InstructionBlock,
    pub content: Vec<ContentBlock>,
}

impl JobRequest {
    /// Number of image blocks.
    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|b| matches!(b, ContentBlock::Image { .. }))
            .count()
    }
}

/// Builds requests that share one instruction block and model settings.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    instructions: InstructionBlock,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl RequestBuilder {
    pub fn new(system_prompt: impl Into<String>, model: impl Into<String>, max_tokens: usize, temperature: f32) -> Self {
        Self {
            instructions: InstructionBlock {
                text: system_prompt.into(),
                cache_breakpoint: true,
            },
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Build the request for `region`. `images` must already be top-to-bottom.
    pub fn build(
        &self,
        region: &RegionSpec,
        images: &[RenderedImage],
        raw_text_excerpt: Option<&str>,
        caption_text: &str,
    ) -> JobRequest {
        let mut content: Vec<ContentBlock> = images
            .iter()
            .map(|img| ContentBlock::Image {
                media_type: img.media_type.clone(),
                data_base64: encode::to_base64(img),
            })
            .collect();
        content.push(ContentBlock::Text {
            text: region_context(caption_text, raw_text_excerpt, images.len()),
        });

        JobRequest {
            custom_id: custom_id(&region.table_id),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            instructions: self.instructions.clone(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use crate::prompts::TRANSCRIBER_SYSTEM_PROMPT;

    fn region(table_id: &str) -> RegionSpec {
        RegionSpec {
            document_ref: "doc".into(),
            page_number: 2,
            bbox: BBox::new(0.0, 100.0, 612.0, 400.0),
            table_id: table_id.into(),
        }
    }

    fn image(tag: u8) -> RenderedImage {
        RenderedImage {
            bytes: vec![tag; 3],
            media_type: "image/png".into(),
        }
    }

    fn builder() -> RequestBuilder {
        RequestBuilder::new(TRANSCRIBER_SYSTEM_PROMPT, "claude-sonnet-4-20250514", 8192, 0.0)
    }

    #[test]
    fn custom_id_is_deterministic() {
        assert_eq!(custom_id("doc_p2_t1"), "doc_p2_t1__transcriber");
        let req = builder().build(&region("doc_p2_t1"), &[image(1)], None, "Table 1");
        assert_eq!(req.custom_id, "doc_p2_t1__transcriber");
    }

    #[test]
    fn images_precede_text_in_given_order() {
        let req = builder().build(&region("t"), &[image(1), image(2)], Some("x y"), "Table 1");
        assert_eq!(req.image_count(), 2);
        match (&req.content[0], &req.content[1], &req.content[2]) {
            (
                ContentBlock::Image { data_base64: a, .. },
                ContentBlock::Image { data_base64: b, .. },
                ContentBlock::Text { text },
            ) => {
                assert_eq!(a, &encode::to_base64(&image(1)));
                assert_eq!(b, &encode::to_base64(&image(2)));
                assert!(text.contains("x y"));
                assert!(text.contains("Table 1"));
            }
            other => panic!("unexpected layout: {other:?}"),
        }
    }

    #[test]
    fn instruction_block_is_identical_across_requests() {
        let b = builder();
        let r1 = b.build(&region("a"), &[image(1)], None, "Table 1");
        let r2 = b.build(&region("b"), &[image(9), image(8)], Some("text"), "Table 7");
        assert_eq!(r1.instructions, r2.instructions);
        assert!(r1.instructions.cache_breakpoint);
        assert_eq!(r1.max_tokens, 8192);
    }
}
