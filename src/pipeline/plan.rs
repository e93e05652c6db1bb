//! Crop planning: caption anchors → table regions.
//!
//! Tables in this corpus are captioned *above* the grid, so a table's region
//! starts at its caption's bottom edge and runs down to whatever comes next:
//! the following caption on the page (table or figure), else the page bottom.
//! Regions span the full page width; the vision model is told to ignore
//! neighbouring body text.

use crate::geometry::{BBox, PageSize};
use crate::output::{Caption, SkipReason};
use tracing::debug;

/// The planner's verdict for one caption, position-aligned with the input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CropSlot {
    /// The caption produced this region.
    Region(BBox),
    /// The caption produced no region.
    Skipped(SkipReason),
}

impl CropSlot {
    pub fn region(&self) -> Option<BBox> {
        match self {
            CropSlot::Region(b) => Some(*b),
            CropSlot::Skipped(_) => None,
        }
    }
}

/// Plan one page.
///
/// `captions` are the page's captions in vertical order. The output has one
/// slot per caption; figure captions and captions whose region would be at
/// most `min_height` tall are [`CropSlot::Skipped`]. Never fails.
pub fn plan_page(captions: &[Caption], page: PageSize, min_height: f64) -> Vec<CropSlot> {
    captions
        .iter()
        .enumerate()
        .map(|(i, caption)| {
            if !caption.is_table() {
                return CropSlot::Skipped(SkipReason::NotATable);
            }

            let top = caption.bbox.bottom.clamp(0.0, page.height);
            let bottom = captions
                .get(i + 1)
                .map(|next| next.bbox.top)
                .filter(|t| t.is_finite())
                .unwrap_or(page.height)
                .clamp(0.0, page.height);

            let bbox = BBox::new(0.0, top, page.width, bottom);
            if !top.is_finite() || bbox.height() <= min_height || page.width <= 0.0 {
                debug!(
                    page = caption.page,
                    number = %caption.number,
                    height = bbox.height(),
                    "degenerate table region"
                );
                return CropSlot::Skipped(SkipReason::DegenerateRegion);
            }
            CropSlot::Region(bbox)
        })
        .collect()
}
