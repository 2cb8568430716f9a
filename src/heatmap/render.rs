//! PNG rendering of heatmap grids.
//!
//! Row 0 of the grid (smallest `y`) is drawn at the bottom of the image. Missing
//! cells are painted neutral grey. Each cell becomes a `scale x scale` pixel block.

use crate::error::{AppResult, ScanError};
use crate::heatmap::{GridStatus, HeatmapGrid};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

const MISSING: Rgb<u8> = Rgb([128, 128, 128]);
const MAX_PIXELS: u64 = 64 * 1024 * 1024;

/// Colormap for heatmap rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Colormap {
    /// Black to white.
    Grayscale,
    /// Perceptually uniform blue-green-yellow.
    #[default]
    Viridis,
    /// Black-red-yellow.
    Inferno,
}

impl Colormap {
    /// Lowercase name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Viridis => "viridis",
            Self::Inferno => "inferno",
        }
    }

    /// Parses a label as produced by [`Colormap::label`], ignoring case.
    pub fn from_label(label: &str) -> Option<Self> {
        [Self::Grayscale, Self::Viridis, Self::Inferno]
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label))
    }

    /// Maps a normalized value (0.0-1.0) to RGB.
    pub fn apply(&self, value: f64) -> [u8; 3] {
        let v = value.clamp(0.0, 1.0);
        let (r, g, b) = match self {
            Self::Grayscale => (v, v, v),
            // purple -> teal -> yellow
            Self::Viridis => (
                0.267 + v * (0.993 - 0.267),
                0.005 + v * (0.906 - 0.005),
                0.329 + (v * std::f64::consts::PI).sin() * 0.25 - v * 0.186,
            ),
            // black -> purple -> orange -> pale yellow
            Self::Inferno => (v.powf(0.5), v.powf(1.5) * 0.85 + v * 0.1, (1.0 - v) * v * 2.4 + v.powi(4) * 0.6),
        };
        [to_byte(r), to_byte(g), to_byte(b)]
    }
}

fn to_byte(channel: f64) -> u8 {
    (channel * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Rendering parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// Color lookup.
    pub colormap: Colormap,
    /// Pixels per cell along each axis (at least 1).
    pub scale: u32,
    /// Fixed `(low, high)` color limits; defaults to the finite range of the grid.
    pub limits: Option<(f64, f64)>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            colormap: Colormap::default(),
            scale: 16,
            limits: None,
        }
    }
}

/// Renders `grid` as PNG bytes.
///
/// # Errors
/// [`ScanError::Aggregation`] for empty or degenerate grids and for images that
/// would exceed 64M pixels.
pub fn render_png(grid: &HeatmapGrid, options: &RenderOptions) -> AppResult<Vec<u8>> {
    match grid.status() {
        GridStatus::Ready { .. } => {}
        GridStatus::Empty => {
            return Err(ScanError::Aggregation("Heatmap has no data".to_string()));
        }
        GridStatus::Degenerate {
            distinct_x,
            distinct_y,
        } => {
            return Err(ScanError::Aggregation(format!(
                "Cannot render a {distinct_x}x{distinct_y} grid as a 2-D heatmap"
            )));
        }
    }

    let scale = options.scale.max(1);
    let to_u32 = |n: usize| {
        u32::try_from(n).map_err(|_| ScanError::Aggregation(format!("Grid dimension {n} too large")))
    };
    let (grid_w, grid_h) = (to_u32(grid.width())?, to_u32(grid.height())?);
    let (width, height) = (grid_w.saturating_mul(scale), grid_h.saturating_mul(scale));
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(ScanError::Aggregation(format!(
            "Rendered heatmap would be {width}x{height} pixels"
        )));
    }

    let (low, high) = options
        .limits
        .or_else(|| grid.value_range())
        .unwrap_or((0.0, 1.0));
    let span = high - low;

    let mut image = RgbImage::from_pixel(width, height, MISSING);
    for (x_index, y_index, value) in grid.iter() {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            continue;
        };
        let normalized = if span > 0.0 { (value - low) / span } else { 0.5 };
        let color = Rgb(options.colormap.apply(normalized));

        // Flip vertically so the smallest y ends up at the bottom
        let px0 = x_index as u32 * scale;
        let py0 = (grid_h - 1 - y_index as u32) * scale;
        for py in py0..py0 + scale {
            for px in px0..px0 + scale {
                image.put_pixel(px, py, color);
            }
        }
    }

    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
