//! Coordinate grid generation.
//!
//! Axes follow the half-open arithmetic rule `start, start + step, ... < start + extent`
//! with `ceil(extent / step)` samples, so the far edge of a region is only sampled when
//! the extent is not a multiple of the step.

use crate::scan::{ScanPoint, ScanRegion};

/// Smallest step the generator will use, in stage units.
pub const MIN_STEP: f64 = 0.1;

/// Clamps a requested step to [`MIN_STEP`]. NaN clamps to the minimum as well.
pub fn clamp_step(step: f64) -> f64 {
    step.max(MIN_STEP)
}

/// Samples along one axis.
///
/// Returns an empty axis for a zero or negative extent.
pub fn axis_values(start: f64, extent: f64, step: f64) -> Vec<f64> {
    let step = clamp_step(step);
    let stop = start + extent;
    let span = (stop - start) / step;
    if !(span > 0.0) || !span.is_finite() {
        return Vec::new();
    }
    let count = span.ceil() as usize;
    (0..count).map(|i| start + i as f64 * step).collect()
}

/// The planned sample coordinates of one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl ScanPlan {
    /// Generates the plan for `region` with the given (unclamped) steps.
    pub fn new(region: &ScanRegion, step_x: f64, step_y: f64) -> Self {
        Self {
            xs: axis_values(region.x, region.width, step_x),
            ys: axis_values(region.y, region.height, step_y),
        }
    }

    /// X samples, ascending.
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    /// Y samples, ascending.
    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    /// Number of planned points; zero when either axis is empty.
    pub fn len(&self) -> usize {
        self.xs.len() * self.ys.len()
    }

    /// True for a zero-point plan.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinates in acquisition order: row-major, `y` outer, both ascending.
    pub fn coordinates(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ys
            .iter()
            .flat_map(move |&y| self.xs.iter().map(move |&x| (x, y)))
    }

    /// Spectrum-less points for pre-sizing a heatmap.
    pub fn planned_points(&self) -> Vec<ScanPoint> {
        self.coordinates()
            .map(|(x, y)| ScanPoint::planned(x, y))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_is_half_open() {
        assert_eq!(axis_values(0.0, 2.0, 1.0), vec![0.0, 1.0]);
        assert_eq!(axis_values(0.0, 2.5, 1.0), vec![0.0, 1.0, 2.0]);
        assert_eq!(axis_values(5.0, 1.0, 0.5), vec![5.0, 5.5]);
    }

    #[test]
    fn test_floating_point_remainders() {
        // 0.3 / 0.1 is slightly below 3
        assert_eq!(axis_values(0.0, 0.3, 0.1).len(), 3);
        assert_eq!(axis_values(0.0, 0.7, 0.1).len(), 7);
    }

    #[test]
    fn test_step_is_clamped() {
        assert_eq!(axis_values(0.0, 1.0, 0.0).len(), 10);
        assert_eq!(axis_values(0.0, 1.0, -3.0).len(), 10);
        assert_eq!(axis_values(0.0, 1.0, f64::NAN).len(), 10);
    }

    #[test]
    fn test_empty_extent() {
        assert!(axis_values(0.0, 0.0, 1.0).is_empty());
        assert!(axis_values(0.0, -1.0, 1.0).is_empty());
    }

    #[test]
    fn test_plan_order_is_row_major() {
        let plan = ScanPlan::new(&ScanRegion::new(0.0, 0.0, 2.0, 2.0), 1.0, 1.0);
        let coords: Vec<_> = plan.coordinates().collect();
        assert_eq!(coords, vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]);
        assert_eq!(plan.len(), 4);
        assert!(plan.planned_points().iter().all(|p| !p.is_acquired()));
    }

    #[test]
    fn test_count_matches_ceil_rule() {
        for (w, h, sx, sy) in [(10.0, 3.0, 1.5, 0.7), (1.0, 1.0, 0.1, 0.25), (7.5, 2.0, 2.5, 2.0)] {
            let plan = ScanPlan::new(&ScanRegion::new(-2.0, 4.0, w, h), sx, sy);
            let expected = (w / sx).ceil() as usize * (h / sy).ceil() as usize;
            assert_eq!(plan.len(), expected, "region {w}x{h} steps {sx}/{sy}");
        }
    }

    #[test]
    fn test_zero_width_plan_is_empty() {
        let plan = ScanPlan::new(&ScanRegion::new(0.0, 0.0, 0.0, 5.0), 1.0, 1.0);
        assert!(plan.is_empty());
        assert!(plan.planned_points().is_empty());
    }
}
