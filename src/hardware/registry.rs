//! Name-based device construction.
//!
//! The registry maps display names to constructors so the front end can offer a
//! device list and build the selected driver from settings.

use crate::config::Settings;
use crate::error::{AppResult, ScanError};
use crate::hardware::capabilities::{MotorController, Spectrometer};
use crate::hardware::mock::{MockMotorController, MockSpectrometer};
use crate::hardware::tcp_spectrometer::TcpSpectrometer;
use std::collections::HashMap;

/// Registry name of [`MockMotorController`].
pub const MOCK_MOTOR: &str = "Dummy Motor Controller";
/// Registry name of [`MockSpectrometer`].
pub const MOCK_SPECTROMETER: &str = "Dummy Spectrometer";
/// Registry name of [`TcpSpectrometer`].
pub const TCP_SPECTROMETER: &str = "TCP Spectrometer";

type MotorFactory = Box<dyn Fn(&Settings) -> Box<dyn MotorController> + Send + Sync>;
type SpectrometerFactory = Box<dyn Fn(&Settings) -> Box<dyn Spectrometer> + Send + Sync>;

/// Constructors for every available motor controller and spectrometer.
#[derive(Default)]
pub struct DeviceRegistry {
    motors: HashMap<String, MotorFactory>,
    spectrometers: HashMap<String, SpectrometerFactory>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the simulated devices and the TCP spectrometer.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_motor(MOCK_MOTOR, |settings| {
            Box::new(MockMotorController::from_config(&settings.mock))
        });
        registry.register_spectrometer(MOCK_SPECTROMETER, |settings| {
            Box::new(MockSpectrometer::from_config(&settings.mock))
        });
        registry.register_spectrometer(TCP_SPECTROMETER, |settings| {
            Box::new(TcpSpectrometer::from_config(&settings.tcp_spectrometer))
        });
        registry
    }

    /// Adds or replaces a motor controller constructor.
    pub fn register_motor<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Settings) -> Box<dyn MotorController> + Send + Sync + 'static,
    {
        self.motors.insert(name.to_string(), Box::new(factory));
    }

    /// Adds or replaces a spectrometer constructor.
    pub fn register_spectrometer<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Settings) -> Box<dyn Spectrometer> + Send + Sync + 'static,
    {
        self.spectrometers.insert(name.to_string(), Box::new(factory));
    }

    /// Sorted motor controller names.
    pub fn available_motors(&self) -> Vec<String> {
        sorted_keys(&self.motors)
    }

    /// Sorted spectrometer names.
    pub fn available_spectrometers(&self) -> Vec<String> {
        sorted_keys(&self.spectrometers)
    }

    /// Builds a disconnected motor controller.
    pub fn create_motor(&self, name: &str, settings: &Settings) -> AppResult<Box<dyn MotorController>> {
        let factory = self
            .motors
            .get(name)
            .ok_or_else(|| ScanError::Configuration(format!("Unknown motor controller: {name}")))?;
        Ok(factory(settings))
    }

    /// Builds a disconnected spectrometer.
    pub fn create_spectrometer(
        &self,
        name: &str,
        settings: &Settings,
    ) -> AppResult<Box<dyn Spectrometer>> {
        let factory = self
            .spectrometers
            .get(name)
            .ok_or_else(|| ScanError::Configuration(format!("Unknown spectrometer: {name}")))?;
        Ok(factory(settings))
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}
