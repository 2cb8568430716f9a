//! Core library for the raman_scan application.
//!
//! This library drives a point-by-point Raman raster scan, reduces each spectrum
//! to a band-integrated intensity on a 2-D grid, and persists the result in a
//! `.raman2dscan` project container. It is used by the `raman-scan` binary and
//! the integration tests.
//!
//! - [`scan`]: coordinate planning and the acquisition engine
//! - [`heatmap`]: spectral-to-spatial aggregation and PNG rendering
//! - [`result`]: the finalized scan bundle
//! - [`project`]: container reader and writer
//! - [`controller`]: device ownership and scan orchestration
//! - [`hardware`]: device capability traits and drivers

pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod heatmap;
pub mod logging;
pub mod project;
pub mod result;
pub mod scan;

pub use controller::{ScanController, ScanOutcome};
pub use error::{AppResult, DeviceStage, ScanError};
pub use heatmap::{Band, Heatmap, HeatmapGrid};
pub use result::ScanResult;
pub use scan::{ScanPoint, ScanRegion, ScanRequest};
