//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use raman_scan::config::Settings;
use raman_scan::hardware::{
    DeviceRegistry, MockMotorController, MockSpectrometer, Spectrometer, Spectrum,
};
use raman_scan::scan::CancelToken;
use raman_scan::{Band, ScanController, ScanRegion, ScanRequest};

/// Spectrum whose [400, 1000] integral is 5 and whose [1500, 2000] integral is 0.
pub fn reference_spectrum() -> Spectrum {
    Spectrum::new(vec![0.0, 500.0, 1000.0], vec![1.0, 2.0, 3.0]).expect("valid spectrum")
}

pub fn band(min: f64, max: f64) -> Band {
    Band::new(min, max).expect("valid band")
}

/// Settings without simulated delays.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.mock.motor_settle_ms = 0;
    settings.mock.acquire_delay_ms = 0;
    settings
}

pub fn request(width: f64, height: f64, step: f64, band: Band) -> ScanRequest {
    ScanRequest::new(ScanRegion::new(0.0, 0.0, width, height), step, step, band)
}

/// Controller with a mock stage and `spectrometer` attached.
pub async fn controller_with(spectrometer: Box<dyn Spectrometer>) -> ScanController {
    let mut controller = ScanController::new(fast_settings(), DeviceRegistry::with_defaults());
    controller
        .attach_motor(Box::new(MockMotorController::default()))
        .await
        .expect("motor connects");
    controller
        .attach_spectrometer(spectrometer)
        .await
        .expect("spectrometer connects");
    controller
}

pub async fn fixed_controller() -> ScanController {
    controller_with(Box::new(MockSpectrometer::fixed(reference_spectrum()))).await
}

/// Returns the reference spectrum and trips `cancel` on the `cancel_at`-th
/// acquisition (1-based).
pub struct CancellingSpectrometer {
    inner: MockSpectrometer,
    cancel: CancelToken,
    cancel_at: usize,
    acquired: usize,
}

impl CancellingSpectrometer {
    pub fn new(cancel: CancelToken, cancel_at: usize) -> Self {
        Self {
            inner: MockSpectrometer::fixed(reference_spectrum()),
            cancel,
            cancel_at,
            acquired: 0,
        }
    }
}

#[async_trait]
impl Spectrometer for CancellingSpectrometer {
    fn name(&self) -> &str {
        "Cancelling Spectrometer"
    }

    async fn connect(&mut self) -> Result<()> {
        self.inner.connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn acquire_spectrum(&mut self) -> Result<Spectrum> {
        let spectrum = self.inner.acquire_spectrum().await?;
        self.acquired += 1;
        if self.acquired == self.cancel_at {
            self.cancel.cancel();
        }
        Ok(spectrum)
    }
}
