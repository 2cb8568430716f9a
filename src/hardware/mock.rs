//! Mock Hardware Implementations
//!
//! Provides simulated devices for running scans without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockMotorController` - Simulated XY stage with a fixed settle time
//! - `MockSpectrometer` - Simulated Raman spectrometer (Gaussian lines over noise)
//!
//! Both support failure injection so tests can exercise the abort paths of the
//! acquisition engine.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use crate::config::{MockConfig, PeakConfig};
use crate::hardware::capabilities::{MotorController, Spectrometer, Spectrum};

// =============================================================================
// MockMotorController - Simulated XY Stage
// =============================================================================

/// Mock XY stage
///
/// Simulates a stage with:
/// - Fixed settle time per move
/// - Position tracking
/// - Move counting for diagnostics, shared so it stays readable after the
///   controller has been handed to a scan
///
/// # Example
///
/// ```rust,ignore
/// let mut motor = MockMotorController::new(Duration::from_millis(5));
/// motor.connect().await?;
/// motor.move_to(10.0, 2.5).await?;
/// assert_eq!(motor.position(), (10.0, 2.5));
/// ```
pub struct MockMotorController {
    connected: bool,
    position: (f64, f64),
    settle: Duration,
    moves: Arc<AtomicUsize>,
    fail_on_move: Option<usize>,
}

impl MockMotorController {
    /// Create a disconnected stage at the origin.
    pub fn new(settle: Duration) -> Self {
        Self {
            connected: false,
            position: (0.0, 0.0),
            settle,
            moves: Arc::new(AtomicUsize::new(0)),
            fail_on_move: None,
        }
    }

    /// Create a stage using the configured settle time.
    pub fn from_config(config: &MockConfig) -> Self {
        Self::new(Duration::from_millis(config.motor_settle_ms))
    }

    /// Make the `n`-th move (1-based) fail.
    pub fn fail_on_move(mut self, n: usize) -> Self {
        self.fail_on_move = Some(n);
        self
    }

    /// Shared counter of move attempts.
    pub fn move_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.moves)
    }

    /// Last commanded position.
    pub fn position(&self) -> (f64, f64) {
        self.position
    }
}

impl Default for MockMotorController {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl MotorController for MockMotorController {
    fn name(&self) -> &str {
        "Dummy Motor Controller"
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        info!("Dummy motor controller connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        info!("Dummy motor controller disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn move_to(&mut self, x: f64, y: f64) -> Result<()> {
        if !self.connected {
            bail!("Motor controller not connected");
        }
        let attempt = self.moves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_move == Some(attempt) {
            bail!("Injected motor fault on move #{attempt}");
        }

        sleep(self.settle).await;
        self.position = (x, y);
        debug!(x, y, "Dummy motor reached position");
        Ok(())
    }
}

// =============================================================================
// MockSpectrometer - Simulated Raman Spectrometer
// =============================================================================

enum SpectrumSource {
    Synthetic {
        shifts: Vec<f64>,
        peaks: Vec<PeakConfig>,
        noise_floor: f64,
        noise_sigma: f64,
        peak_jitter: f64,
        rng: StdRng,
    },
    Fixed(Spectrum),
}

/// Mock spectrometer
///
/// In synthetic mode every acquisition sums Gaussian lines whose centers jitter
/// slightly, adds Gaussian noise around a floor and clips at zero. In fixed mode
/// it returns the same spectrum every time, which makes aggregate values exact.
pub struct MockSpectrometer {
    connected: bool,
    exposure: Duration,
    source: SpectrumSource,
    acquisitions: Arc<AtomicUsize>,
    fail_on_acquire: Option<usize>,
}

impl MockSpectrometer {
    /// Synthetic spectrometer seeded from the OS entropy source.
    pub fn from_config(config: &MockConfig) -> Self {
        Self::synthetic(config, StdRng::from_entropy())
    }

    /// Synthetic spectrometer with a reproducible noise sequence.
    pub fn seeded(config: &MockConfig, seed: u64) -> Self {
        Self::synthetic(config, StdRng::seed_from_u64(seed))
    }

    fn synthetic(config: &MockConfig, rng: StdRng) -> Self {
        Self {
            connected: false,
            exposure: Duration::from_millis(config.acquire_delay_ms),
            source: SpectrumSource::Synthetic {
                shifts: linspace(
                    config.wavenumber_start,
                    config.wavenumber_end,
                    config.num_points,
                ),
                peaks: config.peaks.clone(),
                noise_floor: config.noise_floor,
                noise_sigma: config.noise_sigma,
                peak_jitter: config.peak_jitter,
                rng,
            },
            acquisitions: Arc::new(AtomicUsize::new(0)),
            fail_on_acquire: None,
        }
    }

    /// Spectrometer that always returns `spectrum`, with no exposure delay.
    pub fn fixed(spectrum: Spectrum) -> Self {
        Self {
            connected: false,
            exposure: Duration::ZERO,
            source: SpectrumSource::Fixed(spectrum),
            acquisitions: Arc::new(AtomicUsize::new(0)),
            fail_on_acquire: None,
        }
    }

    /// Override the simulated exposure time.
    pub fn with_exposure(mut self, exposure: Duration) -> Self {
        self.exposure = exposure;
        self
    }

    /// Make the `n`-th acquisition (1-based) fail.
    pub fn fail_on_acquire(mut self, n: usize) -> Self {
        self.fail_on_acquire = Some(n);
        self
    }

    /// Shared counter of acquisition attempts.
    pub fn acquisition_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.acquisitions)
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    fn name(&self) -> &str {
        "Dummy Spectrometer"
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        info!("Dummy spectrometer connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        info!("Dummy spectrometer disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn acquire_spectrum(&mut self) -> Result<Spectrum> {
        if !self.connected {
            bail!("Spectrometer not connected");
        }
        let attempt = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_acquire == Some(attempt) {
            bail!("Injected spectrometer fault on acquisition #{attempt}");
        }

        sleep(self.exposure).await;

        let spectrum = match &mut self.source {
            SpectrumSource::Fixed(spectrum) => spectrum.clone(),
            SpectrumSource::Synthetic {
                shifts,
                peaks,
                noise_floor,
                noise_sigma,
                peak_jitter,
                rng,
            } => {
                let mut intensities = vec![0.0; shifts.len()];
                for peak in peaks.iter() {
                    let center = peak.center + gaussian(rng, 0.0, *peak_jitter);
                    let two_sigma_sq = 2.0 * peak.width * peak.width;
                    for (value, shift) in intensities.iter_mut().zip(shifts.iter()) {
                        *value += peak.amplitude * (-(shift - center).powi(2) / two_sigma_sq).exp();
                    }
                }
                for value in intensities.iter_mut() {
                    *value = (*value + gaussian(rng, *noise_floor, *noise_sigma)).max(0.0);
                }
                Spectrum::new(shifts.clone(), intensities)?
            }
        };

        debug!(samples = spectrum.len(), "Dummy spectrum acquired");
        Ok(spectrum)
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + i as f64 * step).collect()
        }
    }
}

/// Box-Muller sample from N(mean, sigma²).
fn gaussian(rng: &mut StdRng, mean: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return mean;
    }
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    mean + sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_motor_requires_connection() {
        let mut motor = MockMotorController::default();
        assert!(motor.move_to(1.0, 1.0).await.is_err());

        motor.connect().await.unwrap();
        motor.move_to(10.0, 2.5).await.unwrap();
        assert_eq!(motor.position(), (10.0, 2.5));
        assert!(motor.is_connected());

        motor.disconnect().await.unwrap();
        assert!(!motor.is_connected());
    }

    #[tokio::test]
    async fn test_mock_motor_injected_failure() {
        let mut motor = MockMotorController::default().fail_on_move(2);
        let counter = motor.move_counter();
        motor.connect().await.unwrap();

        motor.move_to(0.0, 0.0).await.unwrap();
        assert!(motor.move_to(1.0, 0.0).await.is_err());
        // Position is unchanged by the failed move
        assert_eq!(motor.position(), (0.0, 0.0));
        motor.move_to(2.0, 0.0).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_synthetic_spectrum_shape() {
        let config = MockConfig {
            acquire_delay_ms: 0,
            ..MockConfig::default()
        };
        let mut spectrometer = MockSpectrometer::seeded(&config, 7);
        assert!(spectrometer.acquire_spectrum().await.is_err());

        spectrometer.connect().await.unwrap();
        let spectrum = spectrometer.acquire_spectrum().await.unwrap();
        assert_eq!(spectrum.len(), config.num_points);
        assert_eq!(spectrum.shifts()[0], config.wavenumber_start);
        assert!((spectrum.shifts()[config.num_points - 1] - config.wavenumber_end).abs() < 1e-9);
        assert!(spectrum.intensities().iter().all(|v| *v >= 0.0));

        // The strongest line sits near 520 cm⁻¹
        let (peak_shift, _) = spectrum
            .samples()
            .fold((0.0, f64::MIN), |best, s| if s.1 > best.1 { s } else { best });
        assert!((peak_shift - 520.0).abs() < 30.0, "peak at {peak_shift}");
    }

    #[tokio::test]
    async fn test_fixed_spectrum_and_failure() {
        let spectrum = Spectrum::new(vec![0.0, 500.0], vec![1.0, 2.0]).unwrap();
        let mut spectrometer = MockSpectrometer::fixed(spectrum.clone()).fail_on_acquire(2);
        spectrometer.connect().await.unwrap();

        assert_eq!(spectrometer.acquire_spectrum().await.unwrap(), spectrum);
        let err = spectrometer.acquire_spectrum().await.unwrap_err();
        assert!(err.to_string().contains("Injected"));
        assert_eq!(spectrometer.acquisition_counter().load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_linspace_endpoints() {
        assert_eq!(linspace(0.0, 10.0, 3), vec![0.0, 5.0, 10.0]);
        assert_eq!(linspace(4.0, 9.0, 1), vec![4.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}
