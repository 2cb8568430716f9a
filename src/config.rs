//! Configuration System using Figment
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `RAMAN_SCAN_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! RAMAN_SCAN_APPLICATION__LOG_LEVEL=debug
//! RAMAN_SCAN_SCAN__STEP_X=2.5
//! RAMAN_SCAN_TCP_SPECTROMETER__ADDRESS=192.168.1.20:50009
//! ```
//!
//! # Example
//!
//! ```no_run
//! use raman_scan::config::Settings;
//!
//! let settings = Settings::load(Some("config/raman_scan.toml"))?;
//! println!("Default band: {:?}", settings.scan.default_band()?);
//! # Ok::<(), raman_scan::error::ScanError>(())
//! ```

use crate::error::{AppResult, ScanError};
use crate::heatmap::Band;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Scan parameter defaults and limits
    #[serde(default)]
    pub scan: ScanConfig,
    /// Simulated device behavior
    #[serde(default)]
    pub mock: MockConfig,
    /// Networked spectrometer connection
    #[serde(default)]
    pub tcp_spectrometer: TcpSpectrometerConfig,
    /// Project output settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Raman 2D Scanner".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Scan parameter defaults (stage units are micrometers)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Default X step size
    pub step_x: f64,
    /// Default Y step size
    pub step_y: f64,
    /// Smallest step the grid generator will use
    pub min_step: f64,
    /// Default lower band bound in cm⁻¹
    pub raman_min: f64,
    /// Default upper band bound in cm⁻¹
    pub raman_max: f64,
    /// Lowest selectable wavenumber
    pub raman_min_limit: f64,
    /// Highest selectable wavenumber
    pub raman_max_limit: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step_x: 1.0,
            step_y: 1.0,
            min_step: crate::scan::grid::MIN_STEP,
            raman_min: 400.0,
            raman_max: 1800.0,
            raman_min_limit: 0.0,
            raman_max_limit: 4000.0,
        }
    }
}

impl ScanConfig {
    /// The configured default integration band.
    pub fn default_band(&self) -> AppResult<Band> {
        Band::new(self.raman_min, self.raman_max)
    }

    /// Checks that a band lies within the selectable wavenumber limits.
    pub fn check_band(&self, band: Band) -> AppResult<()> {
        if band.min() < self.raman_min_limit || band.max() > self.raman_max_limit {
            return Err(ScanError::Configuration(format!(
                "Band [{}, {}] outside limits [{}, {}]",
                band.min(),
                band.max(),
                self.raman_min_limit,
                self.raman_max_limit
            )));
        }
        Ok(())
    }
}

/// One Gaussian peak of the simulated spectrum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PeakConfig {
    /// Peak center in cm⁻¹
    pub center: f64,
    /// Peak height
    pub amplitude: f64,
    /// Gaussian sigma in cm⁻¹
    pub width: f64,
}

/// Simulated device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockConfig {
    /// Stage settle time per move in milliseconds
    pub motor_settle_ms: u64,
    /// Spectrometer exposure per acquisition in milliseconds
    pub acquire_delay_ms: u64,
    /// First wavenumber of the spectral axis
    pub wavenumber_start: f64,
    /// Last wavenumber of the spectral axis
    pub wavenumber_end: f64,
    /// Number of spectral samples
    pub num_points: usize,
    /// Mean of the additive noise
    pub noise_floor: f64,
    /// Standard deviation of the additive noise
    pub noise_sigma: f64,
    /// Standard deviation of the per-acquisition peak center jitter
    pub peak_jitter: f64,
    /// Simulated Raman lines
    pub peaks: Vec<PeakConfig>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            motor_settle_ms: 5,
            acquire_delay_ms: 20,
            wavenumber_start: 100.0,
            wavenumber_end: 3200.0,
            num_points: 1024,
            noise_floor: 0.02,
            noise_sigma: 0.03,
            peak_jitter: 2.0,
            peaks: vec![
                PeakConfig {
                    center: 520.0,
                    amplitude: 1.0,
                    width: 25.0,
                },
                PeakConfig {
                    center: 1000.0,
                    amplitude: 0.7,
                    width: 40.0,
                },
                PeakConfig {
                    center: 1600.0,
                    amplitude: 0.5,
                    width: 35.0,
                },
            ],
        }
    }
}

/// Networked spectrometer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TcpSpectrometerConfig {
    /// Host and port of the spectrometer server
    pub address: String,
    /// Exposure time sent on connect, in milliseconds
    pub exposure_ms: u32,
    /// Maximum wait for a data frame, in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for TcpSpectrometerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:50009".to_string(),
            exposure_ms: 10,
            read_timeout_ms: 5000,
        }
    }
}

/// Project output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory for new project files
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("scans"),
        }
    }
}

impl Settings {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns a `ScanError` if the file cannot be parsed or validation fails.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path.as_ref()));
        }
        let settings: Self = figment
            .merge(Env::prefixed("RAMAN_SCAN_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Step sizes are positive and not below the minimum step
    /// - The default band is ordered and inside the limits
    /// - The simulated spectrum has samples and an increasing axis
    /// - The TCP spectrometer address is set
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let scan = &self.scan;
        if !(scan.min_step > 0.0) {
            return Err(ScanError::Configuration(format!(
                "Invalid min_step {}. Must be > 0",
                scan.min_step
            )));
        }
        for (axis, step) in [("step_x", scan.step_x), ("step_y", scan.step_y)] {
            if !(step >= scan.min_step) {
                return Err(ScanError::Configuration(format!(
                    "Invalid {axis} {step}. Must be >= {}",
                    scan.min_step
                )));
            }
        }
        if !(scan.raman_min_limit < scan.raman_max_limit) {
            return Err(ScanError::Configuration(format!(
                "Invalid band limits [{}, {}]",
                scan.raman_min_limit, scan.raman_max_limit
            )));
        }
        scan.check_band(scan.default_band()?)?;

        let mock = &self.mock;
        if mock.num_points == 0 {
            return Err(ScanError::Configuration(
                "mock.num_points must be > 0".to_string(),
            ));
        }
        if !(mock.wavenumber_start < mock.wavenumber_end) {
            return Err(ScanError::Configuration(format!(
                "mock wavenumber axis [{}, {}] must be increasing",
                mock.wavenumber_start, mock.wavenumber_end
            )));
        }

        if self.tcp_spectrometer.address.trim().is_empty() {
            return Err(ScanError::Configuration(
                "tcp_spectrometer.address cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
