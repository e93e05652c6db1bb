//! Page-coordinate geometry.
//!
//! All boxes use a top-left origin measured in PDF points (1/72 inch):
//! `x0` is the left edge, `top` the distance of the upper edge from the top of
//! the page, `x1` the right edge and `bottom` the distance of the lower edge
//! from the top of the page. Caption detectors and the text layer both report
//! boxes this way, so no flipping happens until pdfium is called.

use serde::{Deserialize, Serialize};

/// Rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub top: f64,
    pub x1: f64,
    pub bottom: f64,
}

impl BBox {
    pub fn new(x0: f64, top: f64, x1: f64, bottom: f64) -> Self {
        Self {
            x0,
            top,
            x1,
            bottom,
        }
    }

    /// Width of the bounding box.
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    /// Height of the bounding box.
    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// Longer of width and height.
    pub fn longer_edge(&self) -> f64 {
        self.width().max(self.height())
    }

    /// `true` when both edge pairs are finite and strictly ordered.
    pub fn is_valid(&self) -> bool {
        [self.x0, self.top, self.x1, self.bottom]
            .iter()
            .all(|v| v.is_finite())
            && self.x0 < self.x1
            && self.top < self.bottom
    }

    /// `true` when `other` lies entirely within `self` (edges may touch).
    pub fn contains(&self, other: &BBox) -> bool {
        other.x0 >= self.x0 && other.x1 <= self.x1 && other.top >= self.top && other.bottom <= self.bottom
    }
}

/// Page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// The whole page as a box.
    pub fn bbox(&self) -> BBox {
        BBox::new(0.0, 0.0, self.width, self.height)
    }
}
