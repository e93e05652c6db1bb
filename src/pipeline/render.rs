//! Region rasterisation at an adaptive resolution.
//!
//! ## Choosing the DPI
//!
//! A region's DPI is picked so that its longer edge lands just under the
//! provider's maximum input dimension: anything larger is downscaled
//! server-side and the extra pixels are wasted, anything smaller throws away
//! legibility for free. The result is clamped to `[dpi_floor, dpi_cap]`.
//!
//! ## Strips
//!
//! A tall, narrow region (a full-page table) would land below
//! `strip_dpi_threshold` and its digits become unreadable. Such regions are
//! cut into square strips (strip height = region width) that overlap by
//! `overlap_frac`, so a row sliced by one strip boundary is whole in the next
//! strip. Each strip then gets its own, much higher, DPI.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is CPU-bound and not async-safe; [`render_regions`] therefore runs
//! a document's renders on tokio's blocking pool.

use crate::config::RenderSettings;
use crate::error::{PaperTabError, TableError};
use crate::geometry::BBox;
use crate::output::{RegionSpec, RenderedImage};
use crate::pipeline::encode;
use crate::source::{PdfSource, RasterClip};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tolerance when deciding whether a strip reaches the region bottom.
const STRIP_EPSILON: f64 = 1e-6;

/// Pixels the crop can gain along one axis by snapping both edges outward.
const SNAP_MARGIN_PX: u32 = 2;

/// Images and text-layer excerpt for one region.
#[derive(Debug, Clone)]
pub struct RenderedRegion {
    pub images: Vec<RenderedImage>,
    pub text_excerpt: Option<String>,
}

/// DPI at which `bbox`'s longer edge, once cropped to whole pixels, fits
/// within `max_image_dimension`, clamped.
pub fn effective_dpi(bbox: &BBox, settings: &RenderSettings) -> f64 {
    let floor = settings.dpi_floor as f64;
    let cap = settings.dpi_cap as f64;
    let longer = bbox.longer_edge();
    if !(longer > 0.0) {
        return floor;
    }
    let target = settings.max_image_dimension.saturating_sub(SNAP_MARGIN_PX) as f64;
    (target * 72.0 / longer).clamp(floor, cap)
}

/// Split `bbox` into square, overlapping strips from top to bottom.
///
/// Regions no taller than they are wide come back as a single box. The last
/// strip is clipped to the region bottom.
pub fn plan_strips(bbox: &BBox, overlap_frac: f64) -> Vec<BBox> {
    let strip_height = bbox.width();
    if !(strip_height > 0.0) || bbox.height() <= strip_height {
        return vec![*bbox];
    }
    let step = strip_height - strip_height * overlap_frac;
    if !(step > 0.0) {
        return vec![*bbox];
    }

    let mut strips = Vec::new();
    let mut start = bbox.top;
    loop {
        let end = start + strip_height;
        if end >= bbox.bottom - STRIP_EPSILON {
            strips.push(BBox::new(bbox.x0, start, bbox.x1, bbox.bottom));
            break;
        }
        strips.push(BBox::new(bbox.x0, start, bbox.x1, end));
        start += step;
    }
    strips
}

/// Decide what to rasterise for `bbox`: one clip, or one clip per strip.
pub fn plan_clips(bbox: &BBox, settings: &RenderSettings) -> Vec<RasterClip> {
    let dpi = effective_dpi(bbox, settings);
    let is_tall = bbox.height() > bbox.width();
    if is_tall && dpi < settings.strip_dpi_threshold as f64 {
        let strips = plan_strips(bbox, settings.overlap_frac);
        debug!(
            height = bbox.height(),
            width = bbox.width(),
            dpi,
            strips = strips.len(),
            "splitting tall region into strips"
        );
        strips
            .into_iter()
            .map(|strip| RasterClip {
                dpi: effective_dpi(&strip, settings),
                bbox: strip,
            })
            .collect()
    } else {
        vec![RasterClip { bbox: *bbox, dpi }]
    }
}

/// Render one region to encoded images, top to bottom.
pub fn render_region(
    source: &dyn PdfSource,
    region: &RegionSpec,
    settings: &RenderSettings,
) -> Result<Vec<RenderedImage>, TableError> {
    let render_failed = |detail: String| TableError::RenderFailed {
        table_id: region.table_id.clone(),
        detail,
    };

    if !region.bbox.is_valid() {
        return Err(render_failed(format!("invalid region {:?}", region.bbox)));
    }

    let clips = plan_clips(&region.bbox, settings);
    let images = source
        .rasterize(region.page_number, &clips)
        .map_err(|e: PaperTabError| render_failed(e.to_string()))?;
    if images.len() != clips.len() {
        return Err(render_failed(format!(
            "expected {} images, source returned {}",
            clips.len(),
            images.len()
        )));
    }

    images
        .iter()
        .map(|img| encode::encode_region(img).map_err(|e| render_failed(format!("image encoding failed: {e}"))))
        .collect()
}

/// Render one region and fetch its text excerpt.
///
/// The excerpt is best-effort: a text-layer failure is logged and yields `None`.
pub fn render_with_text(
    source: &dyn PdfSource,
    region: &RegionSpec,
    settings: &RenderSettings,
) -> Result<RenderedRegion, TableError> {
    let images = render_region(source, region, settings)?;
    let text_excerpt = match source.text_in_region(region.page_number, &region.bbox) {
        Ok(text) => text.map(|t| truncate_chars(&t, settings.max_text_excerpt_chars)),
        Err(e) => {
            warn!("{}: text layer unavailable: {}", region.table_id, e);
            None
        }
    };
    Ok(RenderedRegion {
        images,
        text_excerpt,
    })
}

/// Render every region of one document on the blocking pool.
///
/// The output is position-aligned with `regions`.
pub async fn render_regions(
    source: Arc<dyn PdfSource>,
    regions: Vec<RegionSpec>,
    settings: RenderSettings,
) -> Vec<Result<RenderedRegion, TableError>> {
    let ids: Vec<String> = regions.iter().map(|r| r.table_id.clone()).collect();
    let task = tokio::task::spawn_blocking(move || {
        regions
            .iter()
            .map(|region| render_with_text(source.as_ref(), region, &settings))
            .collect::<Vec<_>>()
    });

    match task.await {
        Ok(results) => results,
        Err(e) => {
            warn!("Render task panicked: {}", e);
            ids.into_iter()
                .map(|table_id| {
                    Err(TableError::RenderFailed {
                        table_id,
                        detail: format!("render task panicked: {e}"),
                    })
                })
                .collect()
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::crop_to_clip;
    use image::DynamicImage;

    fn settings() -> RenderSettings {
        RenderSettings {
            max_image_dimension: 1568,
            dpi_floor: 100,
            dpi_cap: 300,
            strip_dpi_threshold: 150,
            overlap_frac: 0.15,
            max_text_excerpt_chars: 10,
        }
    }

    #[test]
    fn dpi_fills_max_dimension() {
        // 1566 px over 612 pt → 184.2 dpi.
        let dpi = effective_dpi(&BBox::new(0.0, 0.0, 612.0, 300.0), &settings());
        assert!((dpi - 1566.0 * 72.0 / 612.0).abs() < 1e-9);
    }

    fn assert_crops_fit(page: &DynamicImage, bbox: BBox, s: &RenderSettings) {
        for clip in plan_clips(&bbox, s) {
            let img = crop_to_clip(page, &clip).unwrap();
            assert!(
                img.width().max(img.height()) <= s.max_image_dimension,
                "{bbox:?} at {:.2} dpi → {}x{}",
                clip.dpi,
                img.width(),
                img.height()
            );
        }
    }

    #[test]
    fn cropped_image_never_exceeds_max_dimension() {
        let s = settings();
        let page = DynamicImage::new_luma8(2000, 1100);
        assert_crops_fit(&page, BBox::new(72.2, 100.0, 540.9, 300.0), &s);
        // Widths whose DPI is not pinned by the floor or the cap.
        for width in 377..=1127 {
            for x0 in [0.0, 72.2] {
                assert_crops_fit(&page, BBox::new(x0, 0.0, x0 + width as f64, 5.0), &s);
            }
        }
    }

    #[test]
    fn dpi_is_clamped() {
        let s = settings();
        assert_eq!(effective_dpi(&BBox::new(0.0, 0.0, 50.0, 40.0), &s), 300.0);
        assert_eq!(effective_dpi(&BBox::new(0.0, 0.0, 612.0, 2000.0), &s), 100.0);
        assert_eq!(effective_dpi(&BBox::new(0.0, 0.0, 0.0, 0.0), &s), 100.0);
    }

    #[test]
    fn strips_for_thousand_point_region() {
        let strips = plan_strips(&BBox::new(0.0, 0.0, 500.0, 1000.0), 0.15);
        let spans: Vec<(f64, f64)> = strips.iter().map(|s| (s.top, s.bottom)).collect();
        assert_eq!(spans, vec![(0.0, 500.0), (425.0, 925.0), (850.0, 1000.0)]);
    }

    #[test]
    fn strips_cover_region_without_gaps() {
        let bbox = BBox::new(36.0, 88.5, 311.0, 1203.25);
        let frac = 0.2;
        let strips = plan_strips(&bbox, frac);
        let expected_overlap = bbox.width() * frac;

        assert_eq!(strips.first().unwrap().top, bbox.top);
        assert_eq!(strips.last().unwrap().bottom, bbox.bottom);
        for pair in strips.windows(2) {
            let overlap = pair[0].bottom - pair[1].top;
            assert!((overlap - expected_overlap).abs() < 1e-6, "overlap {overlap}");
            assert!(pair[1].top > pair[0].top, "strips must advance");
        }
        for s in &strips {
            assert_eq!((s.x0, s.x1), (bbox.x0, bbox.x1));
            assert!(s.height() <= bbox.width() + 1e-9);
        }
    }

    #[test]
    fn short_region_is_not_split() {
        let bbox = BBox::new(0.0, 0.0, 500.0, 500.0);
        assert_eq!(plan_strips(&bbox, 0.15), vec![bbox]);
    }

    #[test]
    fn exact_multiple_has_no_sliver() {
        // step 400, strips [0,400) [400,800) with zero overlap.
        let strips = plan_strips(&BBox::new(0.0, 0.0, 400.0, 800.0), 0.0);
        assert_eq!(strips.len(), 2);
        assert_eq!(strips[1].bottom, 800.0);
    }

    #[test]
    fn tall_low_dpi_region_is_split_with_per_strip_dpi() {
        // 400x900: dpi 125 < 150 → strips of 400pt at 282 dpi.
        let clips = plan_clips(&BBox::new(0.0, 0.0, 400.0, 900.0), &settings());
        assert!(clips.len() > 1);
        for clip in &clips {
            assert!(clip.dpi >= 150.0 && clip.dpi <= 300.0, "dpi {}", clip.dpi);
        }
        assert!(clips.windows(2).all(|w| w[0].bbox.top < w[1].bbox.top));
    }

    #[test]
    fn wide_region_is_never_split() {
        let clips = plan_clips(&BBox::new(0.0, 0.0, 2000.0, 1000.0), &settings());
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].dpi, 100.0);
    }

    #[test]
    fn tall_region_above_threshold_is_not_split() {
        // 612x700: dpi 161 ≥ 150.
        let clips = plan_clips(&BBox::new(0.0, 0.0, 612.0, 700.0), &settings());
        assert_eq!(clips.len(), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("αβγδε", 3), "αβγ");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
