//! Recrop geometry: model-relative box → absolute page box.

use crate::geometry::BBox;

/// Map `bbox_pct = [x0, y0, x1, y1]` (fractions of `original`, measured from
/// its top-left corner) to page coordinates.
///
/// The result never leaves `original`. If an axis ends up empty or inverted
/// after clamping (or a fraction is not finite), that axis falls back to the
/// original's full extent.
pub fn recompute(original: &BBox, bbox_pct: [f64; 4]) -> BBox {
    let [px0, py0, px1, py1] = bbox_pct;
    let (x0, x1) = axis(original.x0, original.x1, px0, px1);
    let (top, bottom) = axis(original.top, original.bottom, py0, py1);
    BBox::new(x0, top, x1, bottom)
}

fn axis(lo: f64, hi: f64, p0: f64, p1: f64) -> (f64, f64) {
    if !(p0.is_finite() && p1.is_finite()) {
        return (lo, hi);
    }
    let span = hi - lo;
    let a = (lo + p0 * span).clamp(lo, hi);
    let b = (lo + p1 * span).clamp(lo, hi);
    if a >= b {
        (lo, hi)
    } else {
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_fractions_into_original() {
        let new = recompute(&BBox::new(0.0, 0.0, 400.0, 800.0), [0.1, 0.1, 0.9, 0.9]);
        assert_eq!(new, BBox::new(40.0, 80.0, 360.0, 720.0));
    }

    #[test]
    fn offsets_are_relative_to_region_origin() {
        let new = recompute(&BBox::new(0.0, 200.0, 600.0, 600.0), [0.0, 0.5, 1.0, 1.0]);
        assert_eq!(new, BBox::new(0.0, 400.0, 600.0, 600.0));
    }

    #[test]
    fn out_of_range_is_clamped() {
        let orig = BBox::new(10.0, 20.0, 110.0, 220.0);
        let new = recompute(&orig, [-0.5, 0.25, 1.5, 2.0]);
        assert_eq!(new, BBox::new(10.0, 70.0, 110.0, 220.0));
        assert!(orig.contains(&new));
    }

    #[test]
    fn inverted_axis_collapses_to_full_extent() {
        let orig = BBox::new(0.0, 0.0, 100.0, 100.0);
        let new = recompute(&orig, [0.8, 0.1, 0.2, 0.6]);
        assert_eq!(new, BBox::new(0.0, 10.0, 100.0, 60.0));

        let both_clamped = recompute(&orig, [1.2, 1.5, 1.3, 1.9]);
        assert_eq!(both_clamped, orig);
    }

    #[test]
    fn non_finite_fraction_keeps_axis() {
        let orig = BBox::new(0.0, 0.0, 100.0, 100.0);
        let new = recompute(&orig, [f64::NAN, 0.2, 0.5, 0.7]);
        assert_eq!(new, BBox::new(0.0, 20.0, 100.0, 70.0));
    }

    #[test]
    fn result_is_always_inside_original() {
        let orig = BBox::new(33.0, 120.5, 579.0, 711.25);
        let steps = [0.0, 0.13, 0.5, 0.77, 1.0];
        for &a in &steps {
            for &b in &steps {
                for &c in &steps {
                    for &d in &steps {
                        let new = recompute(&orig, [a, b, c, d]);
                        assert!(orig.contains(&new), "{:?} for {:?}", new, [a, b, c, d]);
                        assert!(new.is_valid(), "{:?} for {:?}", new, [a, b, c, d]);
                    }
                }
            }
        }
    }
}
