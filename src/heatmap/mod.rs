//! Spectral-to-spatial aggregation.
//!
//! Every acquired spectrum is reduced to one scalar, the sum of intensities whose
//! Raman shift lies inside the active [`Band`] (both bounds inclusive), and stored in
//! a 2-D grid indexed `[y][x]`. Cells that never received a point are `None`; a
//! measured point with no samples in band stores `0.0`.
//!
//! The grid grows as unseen coordinates arrive: the new axis value is inserted in
//! sorted position and a `None` row or column is spliced in, so existing cells keep
//! their values. Changing the band always recomputes every cell from the tracked
//! raw spectra.

pub mod render;

use crate::error::{AppResult, ScanError};
use crate::hardware::Spectrum;
use crate::scan::ScanPoint;
use std::fmt;
use tracing::debug;

pub use render::{Colormap, RenderOptions};

/// Closed wavenumber interval `[min, max]` in cm⁻¹.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    min: f64,
    max: f64,
}

impl Band {
    /// Creates a band; both bounds must be finite and `min < max`.
    pub fn new(min: f64, max: f64) -> AppResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(ScanError::Configuration(format!(
                "Band bounds must be finite, got [{min}, {max}]"
            )));
        }
        if min >= max {
            return Err(ScanError::Configuration(format!(
                "Band minimum {min} must be below maximum {max}"
            )));
        }
        Ok(Self { min, max })
    }

    /// Like [`Band::new`] but accepts the bounds in either order.
    pub fn from_unordered(a: f64, b: f64) -> AppResult<Self> {
        if a <= b {
            Self::new(a, b)
        } else {
            Self::new(b, a)
        }
    }

    /// Lower bound in cm⁻¹.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound in cm⁻¹.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Whether `shift` lies in the band, bounds included.
    pub fn contains(&self, shift: f64) -> bool {
        self.min <= shift && shift <= self.max
    }

    /// Sum of the intensities whose shift falls inside the band; `0.0` when none do.
    pub fn integrate(&self, spectrum: &Spectrum) -> f64 {
        spectrum
            .samples()
            .filter(|(shift, _)| self.contains(*shift))
            .fold(0.0, |acc, (_, intensity)| acc + intensity)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] cm⁻¹", self.min, self.max)
    }
}

/// Whether a grid can be shown as a 2-D image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridStatus {
    /// No coordinates yet.
    Empty,
    /// Fewer than two distinct values along an axis (line or single-point scan).
    Degenerate {
        /// Distinct X values.
        distinct_x: usize,
        /// Distinct Y values.
        distinct_y: usize,
    },
    /// At least two distinct values along both axes.
    Ready {
        /// Number of columns.
        width: usize,
        /// Number of rows.
        height: usize,
    },
}

impl GridStatus {
    fn of(width: usize, height: usize) -> Self {
        if width == 0 || height == 0 {
            GridStatus::Empty
        } else if width < 2 || height < 2 {
            GridStatus::Degenerate {
                distinct_x: width,
                distinct_y: height,
            }
        } else {
            GridStatus::Ready { width, height }
        }
    }

    /// Only `Ready` grids render as images.
    pub fn is_renderable(&self) -> bool {
        matches!(self, GridStatus::Ready { .. })
    }
}

/// Dense row-major snapshot of a heatmap, `cells[y * width + x]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeatmapGrid {
    width: usize,
    height: usize,
    cells: Vec<Option<f64>>,
}

impl HeatmapGrid {
    /// Grid of `width x height` missing cells.
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width * height],
        }
    }

    /// Builds a grid from `[y][x]` rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<Option<f64>>]) -> AppResult<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            return Err(ScanError::Aggregation(
                "Heatmap rows have different lengths".to_string(),
            ));
        }
        let cells = rows.iter().flatten().copied().collect();
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Renderability of this grid.
    pub fn status(&self) -> GridStatus {
        GridStatus::of(self.width, self.height)
    }

    /// Value at `(x_index, y_index)`; `None` when missing or out of bounds.
    pub fn get(&self, x_index: usize, y_index: usize) -> Option<f64> {
        if x_index >= self.width || y_index >= self.height {
            return None;
        }
        self.cells[y_index * self.width + x_index]
    }

    /// Sets a cell. Returns `false` when the index is out of bounds.
    pub fn set(&mut self, x_index: usize, y_index: usize, value: Option<f64>) -> bool {
        if x_index >= self.width || y_index >= self.height {
            return false;
        }
        self.cells[y_index * self.width + x_index] = value;
        true
    }

    /// Iterates `(x_index, y_index, value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Option<f64>)> + '_ {
        let width = self.width.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, value)| (i % width, i / width, *value))
    }

    /// Finite minimum and maximum over present cells.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        finite_range(self.cells.iter().copied().flatten())
    }
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |range, v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Live aggregation surface.
#[derive(Debug, Clone)]
pub struct Heatmap {
    band: Band,
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// `[y][x]`
    cells: Vec<Vec<Option<f64>>>,
    /// Aggregated points, kept for band changes and lookups.
    points: Vec<ScanPoint>,
    /// `[y][x]` index into `points`
    cell_points: Vec<Vec<Option<usize>>>,
}

impl Heatmap {
    /// Empty heatmap integrating over `band`.
    pub fn new(band: Band) -> Self {
        Self {
            band,
            xs: Vec::new(),
            ys: Vec::new(),
            cells: Vec::new(),
            points: Vec::new(),
            cell_points: Vec::new(),
        }
    }

    /// Active integration band.
    pub fn band(&self) -> Band {
        self.band
    }

    /// Sorted distinct X coordinates.
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    /// Sorted distinct Y coordinates.
    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    /// The `[y][x]` grid.
    pub fn z(&self) -> &[Vec<Option<f64>>] {
        &self.cells
    }

    /// Value at a cell, `None` when missing or out of range.
    pub fn cell(&self, x_index: usize, y_index: usize) -> Option<f64> {
        self.cells
            .get(y_index)
            .and_then(|row| row.get(x_index))
            .copied()
            .flatten()
    }

    /// Points aggregated so far, in arrival order.
    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    /// Renderability of the current grid.
    pub fn status(&self) -> GridStatus {
        GridStatus::of(self.xs.len(), self.ys.len())
    }

    /// Resets the grid to the distinct coordinates of `points`, all cells missing.
    ///
    /// Spectra carried by the points are ignored; feed them through
    /// [`Heatmap::add_point`] or [`Heatmap::recompute`].
    pub fn initialize_grid(&mut self, points: &[ScanPoint]) -> GridStatus {
        self.xs = distinct_sorted(points.iter().map(|p| p.x));
        self.ys = distinct_sorted(points.iter().map(|p| p.y));
        self.points.clear();
        self.reset_cells();
        let status = self.status();
        debug!(width = self.xs.len(), height = self.ys.len(), ?status, "Heatmap grid initialized");
        status
    }

    /// Aggregates one point, growing the axes when its coordinate is new.
    ///
    /// Returns the `(x_index, y_index)` cell it was placed in. A planned point only
    /// grows the axes. A second point for the same cell replaces the first.
    pub fn add_point(&mut self, point: &ScanPoint) -> (usize, usize) {
        let x_index = self.ensure_x(point.x);
        let y_index = self.ensure_y(point.y);

        if let Some(spectrum) = &point.spectrum {
            let value = self.band.integrate(spectrum);
            self.cells[y_index][x_index] = Some(value);
            self.track(x_index, y_index, point);
        }
        (x_index, y_index)
    }

    /// Overwrites every cell from `points` under `band`.
    ///
    /// The axes are kept; coordinates that do not match an axis value snap to the
    /// nearest one. An empty grid is first initialized from `points`.
    pub fn recompute(&mut self, points: &[ScanPoint], band: Band) {
        self.band = band;
        if self.xs.is_empty() || self.ys.is_empty() {
            self.xs = distinct_sorted(points.iter().map(|p| p.x));
            self.ys = distinct_sorted(points.iter().map(|p| p.y));
        }
        self.reset_cells();
        self.points.clear();

        for point in points {
            let Some(spectrum) = &point.spectrum else {
                continue;
            };
            let (Some(x_index), Some(y_index)) =
                (nearest_index(&self.xs, point.x), nearest_index(&self.ys, point.y))
            else {
                continue;
            };
            self.cells[y_index][x_index] = Some(self.band.integrate(spectrum));
            self.track(x_index, y_index, point);
        }
        debug!(band = %self.band, points = self.points.len(), "Heatmap recomputed");
    }

    /// Switches the integration band and recomputes from the tracked points.
    pub fn set_band(&mut self, band: Band) {
        let points = std::mem::take(&mut self.points);
        self.recompute(&points, band);
    }

    /// The aggregated point in the cell nearest to `(x, y)`.
    pub fn point_at(&self, x: f64, y: f64) -> Option<&ScanPoint> {
        let x_index = nearest_index(&self.xs, x)?;
        let y_index = nearest_index(&self.ys, y)?;
        self.cell_points[y_index][x_index].map(|i| &self.points[i])
    }

    /// Finite minimum and maximum over present cells.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        finite_range(self.cells.iter().flatten().copied().flatten())
    }

    /// `[x_min, x_max, y_min, y_max]` padded by half a pitch (0.5 for a single value).
    pub fn extent(&self) -> Option<[f64; 4]> {
        let (x_first, x_last) = (*self.xs.first()?, *self.xs.last()?);
        let (y_first, y_last) = (*self.ys.first()?, *self.ys.last()?);
        let dx = half_pitch(&self.xs);
        let dy = half_pitch(&self.ys);
        Some([x_first - dx, x_last + dx, y_first - dy, y_last + dy])
    }

    /// Dense copy of the current grid.
    pub fn snapshot(&self) -> HeatmapGrid {
        HeatmapGrid {
            width: self.xs.len(),
            height: self.ys.len(),
            cells: self.cells.iter().flatten().copied().collect(),
        }
    }

    /// Renders the grid as PNG bytes.
    ///
    /// # Errors
    /// [`ScanError::Aggregation`] when the grid is empty or degenerate.
    pub fn export_png(&self, options: &RenderOptions) -> AppResult<Vec<u8>> {
        render::render_png(&self.snapshot(), options)
    }

    fn track(&mut self, x_index: usize, y_index: usize, point: &ScanPoint) {
        let slot = self.cell_points[y_index][x_index];
        match slot {
            Some(existing) => self.points[existing] = point.clone(),
            None => {
                self.cell_points[y_index][x_index] = Some(self.points.len());
                self.points.push(point.clone());
            }
        }
    }

    fn reset_cells(&mut self) {
        self.cells = vec![vec![None; self.xs.len()]; self.ys.len()];
        self.cell_points = vec![vec![None; self.xs.len()]; self.ys.len()];
    }

    fn ensure_x(&mut self, x: f64) -> usize {
        match locate(&self.xs, x) {
            Ok(index) => index,
            Err(index) => {
                self.xs.insert(index, x);
                for row in &mut self.cells {
                    row.insert(index, None);
                }
                for row in &mut self.cell_points {
                    row.insert(index, None);
                }
                index
            }
        }
    }

    fn ensure_y(&mut self, y: f64) -> usize {
        match locate(&self.ys, y) {
            Ok(index) => index,
            Err(index) => {
                self.ys.insert(index, y);
                self.cells.insert(index, vec![None; self.xs.len()]);
                self.cell_points.insert(index, vec![None; self.xs.len()]);
                index
            }
        }
    }
}

fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values.dedup();
    values
}

/// Tolerance for treating a coordinate as an existing axis value: a quarter of the
/// smallest pitch, or a relative epsilon for axes with fewer than two values.
fn snap_tolerance(axis: &[f64], value: f64) -> f64 {
    let min_pitch = axis
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    if min_pitch.is_finite() {
        min_pitch * 0.25
    } else {
        1e-9 * value.abs().max(1.0)
    }
}

/// `Ok(index)` of the matching axis value, or `Err(insert_position)`.
fn locate(axis: &[f64], value: f64) -> Result<usize, usize> {
    let position = axis.partition_point(|v| *v < value);
    let tolerance = snap_tolerance(axis, value);
    let candidates = [position.checked_sub(1), Some(position)];
    candidates
        .into_iter()
        .flatten()
        .filter(|&i| i < axis.len())
        .filter(|&i| (axis[i] - value).abs() <= tolerance)
        .min_by(|&a, &b| (axis[a] - value).abs().total_cmp(&(axis[b] - value).abs()))
        .ok_or(position)
}

/// Index of the axis value closest to `value`; `None` for an empty axis.
fn nearest_index(axis: &[f64], value: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - value).abs().total_cmp(&(*b - value).abs()))
        .map(|(i, _)| i)
}

fn half_pitch(axis: &[f64]) -> f64 {
    match axis {
        [first, second, ..] => (second - first) / 2.0,
        _ => 0.5,
    }
}
