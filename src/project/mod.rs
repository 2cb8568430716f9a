//! `.raman2dscan` project container.
//!
//! A project is a deflated zip archive:
//!
//! | Entry | Content |
//! |---|---|
//! | `info.json` | creation time, scan and spectrometer metadata, heatmap band |
//! | `spectra.csv` | `x,y,raman_shift,intensity`, one row per spectral sample |
//! | `heatmap_<min>_<max>.csv` | `x_index,y_index,integrated_intensity`, every cell, empty when missing |
//! | `heatmap_<min>_<max>.png` | optional rendered heatmap |
//! | `camera_overview.png` | optional camera overview (`camera_view.png` in older files) |
//! | `camera_raw.png` | optional raw camera crop |
//!
//! The grid size is not stored; the reader derives it from the largest indices.

mod reader;
mod writer;

pub use reader::{read, read_from};
pub use writer::{write, write_to};

use crate::result::{ScanMeta, SpectrometerMeta};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extension of project containers.
pub const EXTENSION: &str = "raman2dscan";

pub(crate) const INFO_ENTRY: &str = "info.json";
pub(crate) const SPECTRA_ENTRY: &str = "spectra.csv";
pub(crate) const CAMERA_OVERVIEW_ENTRY: &str = "camera_overview.png";
pub(crate) const LEGACY_CAMERA_ENTRY: &str = "camera_view.png";
pub(crate) const CAMERA_RAW_ENTRY: &str = "camera_raw.png";

/// Contents of `info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProjectInfo {
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub scan: ScanMeta,
    #[serde(default)]
    pub spectrometer: SpectrometerMeta,
    pub heatmap: HeatmapInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct HeatmapInfo {
    pub left_bound_cm1: f64,
    pub right_bound_cm1: f64,
}

/// One row of a heatmap table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct HeatmapRow {
    pub x_index: usize,
    pub y_index: usize,
    pub integrated_intensity: Option<f64>,
}

/// Formats a band bound for entry names; whole numbers keep a trailing `.0`.
pub(crate) fn format_bound(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

pub(crate) fn heatmap_entry(min: f64, max: f64, extension: &str) -> String {
    format!("heatmap_{}_{}.{extension}", format_bound(min), format_bound(max))
}

/// `path` with its extension forced to [`EXTENSION`].
pub fn project_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.extension().is_some_and(|ext| ext == EXTENSION) {
        path.to_path_buf()
    } else {
        path.with_extension(EXTENSION)
    }
}
