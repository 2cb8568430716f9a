//! Raster scan definition and acquisition.
//!
//! A scan is described by a [`ScanRequest`]: the region of interest, the requested
//! pitch along each axis and the integration band used for the live heatmap.
//! [`grid::ScanPlan`] turns it into coordinates and [`engine::ScanEngine`] drives the
//! devices through them.

pub mod engine;
pub mod grid;

use crate::error::{AppResult, ScanError};
use crate::hardware::Spectrum;
use crate::heatmap::Band;
use serde::{Deserialize, Serialize};

pub use engine::{
    CancelToken, ScanDevices, ScanEngine, ScanEvent, ScanHandle, ScanReport, ScanState,
    StartRejected,
};
pub use grid::{ScanPlan, MIN_STEP};

/// One sampled location. `spectrum` is `None` for a planned point that has not
/// been acquired yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    /// Stage X.
    pub x: f64,
    /// Stage Y.
    pub y: f64,
    /// Acquired spectrum.
    pub spectrum: Option<Spectrum>,
}

impl ScanPoint {
    /// A coordinate scheduled for acquisition.
    pub fn planned(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            spectrum: None,
        }
    }

    /// A coordinate with its acquired spectrum.
    pub fn acquired(x: f64, y: f64, spectrum: Spectrum) -> Self {
        Self {
            x,
            y,
            spectrum: Some(spectrum),
        }
    }

    /// Whether a spectrum is attached.
    pub fn is_acquired(&self) -> bool {
        self.spectrum.is_some()
    }
}

/// Rectangular region of interest in stage coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanRegion {
    /// Origin X.
    pub x: f64,
    /// Origin Y.
    pub y: f64,
    /// Extent along X.
    pub width: f64,
    /// Extent along Y.
    pub height: f64,
}

impl ScanRegion {
    /// Region with origin `(x, y)`.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rejects non-finite values and negative extents. A zero extent is valid and
    /// produces a zero-point scan.
    pub fn validate(&self) -> AppResult<()> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ScanError::Configuration(format!(
                "Region {self:?} contains non-finite values"
            )));
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(ScanError::Configuration(format!(
                "Region extent must not be negative (width {}, height {})",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Everything needed to start a scan besides the devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRequest {
    /// Area to cover.
    pub region: ScanRegion,
    /// Requested X pitch.
    pub step_x: f64,
    /// Requested Y pitch.
    pub step_y: f64,
    /// Band for the live heatmap.
    pub band: Band,
}

impl ScanRequest {
    /// Request from its parts.
    pub fn new(region: ScanRegion, step_x: f64, step_y: f64, band: Band) -> Self {
        Self {
            region,
            step_x,
            step_y,
            band,
        }
    }

    /// Semantic checks performed before any device is touched.
    ///
    /// Steps below [`MIN_STEP`] are clamped rather than rejected, but infinite
    /// steps are refused.
    pub fn validate(&self) -> AppResult<()> {
        self.region.validate()?;
        for (axis, step) in [("step_x", self.step_x), ("step_y", self.step_y)] {
            if step.is_infinite() {
                return Err(ScanError::Configuration(format!("{axis} must be finite")));
            }
        }
        Ok(())
    }

    /// Steps actually used by the generator.
    pub fn effective_steps(&self) -> (f64, f64) {
        (grid::clamp_step(self.step_x), grid::clamp_step(self.step_y))
    }

    /// The coordinate plan for this request.
    pub fn plan(&self) -> ScanPlan {
        ScanPlan::new(&self.region, self.step_x, self.step_y)
    }

    /// Spectrum-less points in acquisition order.
    pub fn generate_planned_points(&self) -> Vec<ScanPoint> {
        self.plan().planned_points()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band() -> Band {
        Band::new(400.0, 1000.0).unwrap()
    }

    #[test]
    fn test_region_validation() {
        assert!(ScanRegion::new(0.0, 0.0, 0.0, 0.0).validate().is_ok());
        assert!(ScanRegion::new(0.0, 0.0, -1.0, 2.0).validate().is_err());
        assert!(ScanRegion::new(f64::NAN, 0.0, 1.0, 2.0).validate().is_err());
    }

    #[test]
    fn test_request_clamps_steps() {
        let request = ScanRequest::new(ScanRegion::new(0.0, 0.0, 1.0, 1.0), 0.0, -2.0, band());
        assert!(request.validate().is_ok());
        assert_eq!(request.effective_steps(), (MIN_STEP, MIN_STEP));
        assert_eq!(request.generate_planned_points().len(), 100);
    }

    #[test]
    fn test_request_rejects_infinite_step() {
        let request = ScanRequest::new(
            ScanRegion::new(0.0, 0.0, 1.0, 1.0),
            f64::INFINITY,
            1.0,
            band(),
        );
        assert!(matches!(
            request.validate(),
            Err(ScanError::Configuration(_))
        ));
    }
}
