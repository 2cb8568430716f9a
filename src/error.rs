//! Custom error types for the scanning library.
//!
//! This module defines the primary error type, `ScanError`, shared by every part of
//! the crate. Using the `thiserror` crate, it provides a centralized and consistent
//! way to report what went wrong and at which stage of the workflow.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: Semantic errors caught before a scan starts, such as a
//!   region with negative extent or an inverted integration band. A scan never
//!   transitions to `Running` when one of these is raised.
//! - **`Device`**: A motor or spectrometer call failed. These are fatal to the
//!   current scan only; the points collected so far stay usable.
//! - **`Aggregation`**: The heatmap cannot be rendered as a 2-D image (empty or
//!   line-shaped grids).
//! - **`Format`**: A project container is missing an entry or its content does not
//!   describe a consistent result. No partial result is returned alongside it.
//! - **`Io`**, **`Zip`**, **`Csv`**, **`Json`**, **`Image`**, **`Settings`**: Wrapped
//!   errors from the underlying crates, created with `?` through `#[from]`.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// The device call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStage {
    /// Opening the connection to a device.
    Connect,
    /// Closing the connection to a device.
    Disconnect,
    /// Commanding the stage to a coordinate.
    Move,
    /// Reading one spectrum.
    Acquire,
}

impl fmt::Display for DeviceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceStage::Connect => "connect",
            DeviceStage::Disconnect => "disconnect",
            DeviceStage::Move => "move",
            DeviceStage::Acquire => "acquire",
        };
        f.write_str(name)
    }
}

/// Error type for scanning, aggregation and project I/O.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Invalid request, band or settings; nothing was started.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A device call failed.
    #[error("Device error during {stage}: {message}")]
    Device {
        /// The failing call.
        stage: DeviceStage,
        /// Driver error with its cause chain.
        message: String,
    },

    /// The named device is missing or disconnected.
    #[error("{0} not connected")]
    DeviceNotConnected(&'static str),

    /// A scan is in progress.
    #[error("Scan already running")]
    AlreadyRunning,

    /// The acquisition task panicked or was aborted.
    #[error("Scan worker failed: {0}")]
    Worker(String),

    /// The grid cannot be rendered.
    #[error("Heatmap aggregation error: {0}")]
    Aggregation(String),

    /// Inconsistent project container.
    #[error("Project format error: {0}")]
    Format(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip container error.
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Table encoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Metadata encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// PNG encoding error.
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration could not be loaded.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),
}

impl ScanError {
    /// Wraps a driver error for the given stage, keeping the full cause chain.
    pub fn device(stage: DeviceStage, err: &anyhow::Error) -> Self {
        ScanError::Device {
            stage,
            message: format!("{err:#}"),
        }
    }

    /// Returns the failing device stage for device errors.
    pub fn stage(&self) -> Option<DeviceStage> {
        match self {
            ScanError::Device { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Settings(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Configuration("band min must be below max".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: band min must be below max"
        );
    }

    #[test]
    fn test_device_error_names_stage() {
        let cause = anyhow::anyhow!("stage limit switch").context("move failed");
        let err = ScanError::device(DeviceStage::Move, &cause);
        assert_eq!(err.stage(), Some(DeviceStage::Move));
        let text = err.to_string();
        assert!(text.starts_with("Device error during move"));
        assert!(text.contains("stage limit switch"));
    }

    #[test]
    fn test_not_connected_display() {
        let err = ScanError::DeviceNotConnected("Spectrometer");
        assert_eq!(err.to_string(), "Spectrometer not connected");
        assert_eq!(err.stage(), None);
    }
}
