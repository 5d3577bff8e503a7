//! Calibration observations and target placement.

use serde::{Deserialize, Serialize};

use crate::math::{Pt2, Real};

/// One calibration observation.
///
/// `raw` must already have any previously active transform removed; a pair
/// recorded in calibrated space contaminates the fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePair {
    /// Normalized target position on the display.
    pub screen: Pt2,
    /// Normalized device position with no calibration applied.
    pub raw: Pt2,
}

impl SamplePair {
    pub fn new(screen: Pt2, raw: Pt2) -> Self {
        Self { screen, raw }
    }
}

/// Place `count` targets on a near-square grid inside `[margin, 1 - margin]²`.
///
/// The grid has `ceil(sqrt(count))` columns and as many rows as needed; targets
/// fill it row-major starting at the top-left. Four targets give the four
/// corners of the inset rectangle, three give an L that is never collinear.
pub fn target_grid(count: usize, margin: Real) -> Vec<Pt2> {
    if count == 0 {
        return Vec::new();
    }
    let cols = (count as Real).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    let span = 1.0 - 2.0 * margin;

    let axis = |i: usize, n: usize| {
        if n == 1 {
            0.5
        } else {
            margin + span * i as Real / (n - 1) as Real
        }
    };

    (0..count)
        .map(|i| Pt2::new(axis(i % cols, cols), axis(i / cols, rows)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn four_targets_are_inset_corners() {
        let t = target_grid(4, 0.1);
        assert_eq!(t.len(), 4);
        assert_relative_eq!(t[0], Pt2::new(0.1, 0.1), epsilon = 1e-12);
        assert_relative_eq!(t[1], Pt2::new(0.9, 0.1), epsilon = 1e-12);
        assert_relative_eq!(t[2], Pt2::new(0.1, 0.9), epsilon = 1e-12);
        assert_relative_eq!(t[3], Pt2::new(0.9, 0.9), epsilon = 1e-12);
    }

    #[test]
    fn three_targets_are_not_collinear() {
        let t = target_grid(3, 0.1);
        let area = (t[1].x - t[0].x) * (t[2].y - t[0].y) - (t[1].y - t[0].y) * (t[2].x - t[0].x);
        assert!(area.abs() > 0.1);
    }

    #[test]
    fn nine_targets_fill_a_square_grid() {
        let t = target_grid(9, 0.05);
        assert_relative_eq!(t[4], Pt2::new(0.5, 0.5), epsilon = 1e-12);
        assert_relative_eq!(t[8], Pt2::new(0.95, 0.95), epsilon = 1e-12);
    }

    #[test]
    fn targets_stay_inside_margin() {
        for n in 1..=16 {
            for p in target_grid(n, 0.15) {
                assert!((0.15 - 1e-12..=0.85 + 1e-12).contains(&p.x), "n={n} p={p}");
                assert!((0.15 - 1e-12..=0.85 + 1e-12).contains(&p.y), "n={n} p={p}");
            }
        }
    }
}
