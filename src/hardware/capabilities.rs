//! Capability traits for the two devices a raster scan drives.
//!
//! Both traits are async and object-safe so the acquisition engine can own them as
//! `Box<dyn ...>` for the duration of one scan. Errors are reported as
//! `anyhow::Error`; the engine attaches the failing stage when it converts them.

use anyhow::{ensure, Result};
use async_trait::async_trait;

/// One acquired spectrum: the Raman shift axis and the matching intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    shifts: Vec<f64>,
    intensities: Vec<f64>,
}

impl Spectrum {
    /// Pairs a shift axis with its intensities.
    ///
    /// # Errors
    /// Returns an error if the two sequences differ in length.
    pub fn new(shifts: Vec<f64>, intensities: Vec<f64>) -> Result<Self> {
        ensure!(
            shifts.len() == intensities.len(),
            "spectrum length mismatch: {} shifts vs {} intensities",
            shifts.len(),
            intensities.len()
        );
        Ok(Self {
            shifts,
            intensities,
        })
    }

    /// Raman shift axis in cm⁻¹.
    pub fn shifts(&self) -> &[f64] {
        &self.shifts
    }

    /// Raw intensities, same length as [`Spectrum::shifts`].
    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    /// True when the spectrum holds no samples.
    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    /// Iterates `(shift, intensity)` pairs.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.shifts
            .iter()
            .copied()
            .zip(self.intensities.iter().copied())
    }
}

/// Two-axis motion stage.
#[async_trait]
pub trait MotorController: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Opens the connection to the controller.
    async fn connect(&mut self) -> Result<()>;

    /// Closes the connection. Disconnecting twice is not an error.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the controller is ready to move.
    fn is_connected(&self) -> bool;

    /// Moves to `(x, y)` and returns once the stage has settled.
    async fn move_to(&mut self, x: f64, y: f64) -> Result<()>;
}

/// Spectrometer delivering one spectrum per call.
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Opens the connection to the spectrometer.
    async fn connect(&mut self) -> Result<()>;

    /// Closes the connection. Disconnecting twice is not an error.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the spectrometer is ready to acquire.
    fn is_connected(&self) -> bool;

    /// Acquires one spectrum, blocking the caller for the exposure.
    async fn acquire_spectrum(&mut self) -> Result<Spectrum>;
}
