//! Finalized scan results.
//!
//! A [`ScanResult`] is assembled once, when a scan ends or when a project file is
//! opened, and is never mutated afterwards. Re-analysis under another band produces
//! a new result through [`ScanResult::rebanded`].

use crate::hardware::Spectrum;
use crate::heatmap::{Band, Heatmap, HeatmapGrid};
use crate::scan::{ScanPlan, ScanPoint, ScanRegion};
use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Scan geometry stored with a result. Unknown keys are preserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanMeta {
    /// Number of acquired points.
    pub point_count: usize,
    /// Effective X pitch.
    #[serde(alias = "step_size_x")]
    pub step_x: f64,
    /// Effective Y pitch.
    #[serde(alias = "step_size_y")]
    pub step_y: f64,
    /// Requested region, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<ScanRegion>,
    /// Keys written by other tools, such as `raman_min`/`raman_max`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Spectrometer settings recorded with a result. Unknown keys are preserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectrometerMeta {
    /// Device name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Exposure per spectrum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_time_ms: Option<f64>,
    /// Accumulations per point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averages: Option<u32>,
    /// Laser wavelength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excitation_wavelength_nm: Option<f64>,
    /// Vendor-specific keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One row of the long-form spectra table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectraRow {
    /// Stage X.
    pub x: f64,
    /// Stage Y.
    pub y: f64,
    /// Wavenumber in cm⁻¹.
    pub raman_shift: f64,
    /// Raw intensity.
    pub intensity: f64,
}

/// Opaque PNG payloads attached to a result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanImages {
    /// Rendered heatmap for `heatmap_bounds`.
    pub heatmap_png: Option<Vec<u8>>,
    /// Camera overview.
    pub camera_overview_png: Option<Vec<u8>>,
    /// Raw camera crop of the scanned region.
    pub camera_raw_png: Option<Vec<u8>>,
}

/// Parameters of the scan being finalized.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanParams {
    /// Requested region, when known.
    pub region: Option<ScanRegion>,
    /// Effective X pitch.
    pub step_x: f64,
    /// Effective Y pitch.
    pub step_y: f64,
    /// Spectrometer description.
    pub spectrometer: SpectrometerMeta,
}

/// Everything a finished scan produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Scan geometry.
    pub scan_meta: ScanMeta,
    /// Spectrometer description.
    pub spectrometer_meta: SpectrometerMeta,
    /// Band the grid was computed under.
    pub heatmap_bounds: Band,
    /// Every sample of every acquired spectrum.
    pub spectra_table: Vec<SpectraRow>,
    /// Band-integrated intensities.
    pub heatmap_grid: HeatmapGrid,
    /// Attached PNGs.
    pub images: ScanImages,
    /// Local time, whole seconds.
    pub created_at: Option<NaiveDateTime>,
}

impl ScanResult {
    /// Bundles the collected points with the heatmap's current grid and band.
    ///
    /// Everything except `created_at` depends only on `points`, `params` and the
    /// heatmap state, so finalizing twice yields identical tables and grids.
    pub fn finalize(
        points: &[ScanPoint],
        params: &ScanParams,
        heatmap: &Heatmap,
        images: ScanImages,
    ) -> Self {
        let spectra_table = flatten_spectra(points);
        let point_count = points.iter().filter(|p| p.is_acquired()).count();
        debug!(point_count, rows = spectra_table.len(), "Finalizing scan result");

        Self {
            scan_meta: ScanMeta {
                point_count,
                step_x: params.step_x,
                step_y: params.step_y,
                region: params.region,
                extra: BTreeMap::new(),
            },
            spectrometer_meta: params.spectrometer.clone(),
            heatmap_bounds: heatmap.band(),
            spectra_table,
            heatmap_grid: heatmap.snapshot(),
            images,
            created_at: Some(now_seconds()),
        }
    }

    /// Rebuilds acquired points from the spectra table, grouped by `(x, y)` in
    /// order of first appearance.
    pub fn scan_points(&self) -> Vec<ScanPoint> {
        let mut order: Vec<(f64, f64)> = Vec::new();
        let mut samples: BTreeMap<(u64, u64), (Vec<f64>, Vec<f64>)> = BTreeMap::new();

        for row in &self.spectra_table {
            let key = (row.x.to_bits(), row.y.to_bits());
            let entry = samples.entry(key).or_insert_with(|| {
                order.push((row.x, row.y));
                (Vec::new(), Vec::new())
            });
            entry.0.push(row.raman_shift);
            entry.1.push(row.intensity);
        }

        order
            .into_iter()
            .filter_map(|(x, y)| {
                let (shifts, intensities) = samples.remove(&(x.to_bits(), y.to_bits()))?;
                // Lengths are equal by construction
                let spectrum = Spectrum::new(shifts, intensities).ok()?;
                Some(ScanPoint::acquired(x, y, spectrum))
            })
            .collect()
    }

    /// Heatmap rebuilt from the spectra table under the stored band. Axes come from
    /// the planned grid when the region is known, otherwise from the acquired
    /// coordinates.
    pub fn heatmap(&self) -> Heatmap {
        let mut heatmap = Heatmap::new(self.heatmap_bounds);
        let points = self.scan_points();
        match self.scan_meta.region {
            Some(region) => {
                let plan = ScanPlan::new(&region, self.scan_meta.step_x, self.scan_meta.step_y);
                heatmap.initialize_grid(&plan.planned_points());
            }
            None => {
                heatmap.initialize_grid(&points);
            }
        }
        heatmap.recompute(&points, self.heatmap_bounds);
        heatmap
    }

    /// A new result whose grid is recomputed from the raw spectra under `band`.
    ///
    /// The stored heatmap PNG no longer matches and is dropped; camera images are
    /// kept.
    pub fn rebanded(&self, band: Band) -> Self {
        let mut heatmap = self.heatmap();
        heatmap.set_band(band);
        debug!(%band, "Rebanded scan result");

        Self {
            scan_meta: self.scan_meta.clone(),
            spectrometer_meta: self.spectrometer_meta.clone(),
            heatmap_bounds: band,
            spectra_table: self.spectra_table.clone(),
            heatmap_grid: heatmap.snapshot(),
            images: ScanImages {
                heatmap_png: None,
                ..self.images.clone()
            },
            created_at: Some(now_seconds()),
        }
    }
}

fn flatten_spectra(points: &[ScanPoint]) -> Vec<SpectraRow> {
    points
        .iter()
        .filter_map(|p| p.spectrum.as_ref().map(|s| (p.x, p.y, s)))
        .flat_map(|(x, y, spectrum)| {
            spectrum.samples().map(move |(raman_shift, intensity)| SpectraRow {
                x,
                y,
                raman_shift,
                intensity,
            })
        })
        .collect()
}

fn now_seconds() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn spectrum() -> Spectrum {
        Spectrum::new(vec![0.0, 500.0, 1000.0], vec![1.0, 2.0, 3.0]).unwrap()
    }

    fn scanned() -> (Vec<ScanPoint>, ScanParams, Heatmap) {
        let region = ScanRegion::new(0.0, 0.0, 2.0, 2.0);
        let plan = ScanPlan::new(&region, 1.0, 1.0);
        let mut heatmap = Heatmap::new(Band::new(400.0, 1000.0).unwrap());
        heatmap.initialize_grid(&plan.planned_points());
        // Three of four points acquired
        let points: Vec<_> = plan
            .coordinates()
            .take(3)
            .map(|(x, y)| ScanPoint::acquired(x, y, spectrum()))
            .collect();
        points.iter().for_each(|p| {
            heatmap.add_point(p);
        });
        let params = ScanParams {
            region: Some(region),
            step_x: 1.0,
            step_y: 1.0,
            spectrometer: SpectrometerMeta::default(),
        };
        (points, params, heatmap)
    }

    #[test]
    fn test_finalize_flattens_and_snapshots() {
        let (points, params, heatmap) = scanned();
        let result = ScanResult::finalize(&points, &params, &heatmap, ScanImages::default());

        assert_eq!(result.scan_meta.point_count, 3);
        assert_eq!(result.spectra_table.len(), 9);
        assert_eq!(
            result.spectra_table[4],
            SpectraRow {
                x: 1.0,
                y: 0.0,
                raman_shift: 500.0,
                intensity: 2.0
            }
        );
        assert_eq!(result.heatmap_grid.get(1, 0), Some(5.0));
        assert_eq!(result.heatmap_grid.get(1, 1), None);
        assert_eq!(result.created_at.map(|t| t.nanosecond()), Some(0));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (points, params, heatmap) = scanned();
        let a = ScanResult::finalize(&points, &params, &heatmap, ScanImages::default());
        let b = ScanResult::finalize(&points, &params, &heatmap, ScanImages::default());
        assert_eq!(a.spectra_table, b.spectra_table);
        assert_eq!(a.heatmap_grid, b.heatmap_grid);
    }

    #[test]
    fn test_scan_points_round_trip() {
        let (points, params, heatmap) = scanned();
        let result = ScanResult::finalize(&points, &params, &heatmap, ScanImages::default());
        assert_eq!(result.scan_points(), points);
    }

    #[test]
    fn test_rebanded_recomputes_grid() {
        let (points, params, heatmap) = scanned();
        let images = ScanImages {
            heatmap_png: Some(vec![1, 2, 3]),
            camera_overview_png: Some(vec![4]),
            camera_raw_png: None,
        };
        let result = ScanResult::finalize(&points, &params, &heatmap, images);

        let wide = result.rebanded(Band::new(0.0, 2000.0).unwrap());
        assert_eq!(wide.heatmap_grid.width(), 2);
        assert_eq!(wide.heatmap_grid.height(), 2);
        assert_eq!(wide.heatmap_grid.get(0, 0), Some(6.0));
        assert_eq!(wide.heatmap_grid.get(1, 1), None);
        assert_eq!(wide.images.heatmap_png, None);
        assert_eq!(wide.images.camera_overview_png, Some(vec![4]));
        // The source result is untouched
        assert_eq!(result.heatmap_grid.get(0, 0), Some(5.0));
    }

    #[test]
    fn test_spectrometer_meta_keeps_unknown_keys() {
        let json = r#"{"integration_time_ms": 100.0, "grating": "600 l/mm"}"#;
        let meta: SpectrometerMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.integration_time_ms, Some(100.0));
        assert_eq!(meta.extra["grating"], "600 l/mm");
        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["grating"], "600 l/mm");
    }

    #[test]
    fn test_scan_meta_reads_legacy_step_keys() {
        let json = r#"{"point_count": 4, "step_size_x": 2.5, "step_size_y": 0.5, "raman_min": 400}"#;
        let meta: ScanMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.step_x, 2.5);
        assert_eq!(meta.step_y, 0.5);
        assert_eq!(meta.extra["raman_min"], 400);

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["step_x"], 2.5);
        assert_eq!(back["raman_min"], 400);
    }
}
