//! Application-level scan orchestration.
//!
//! `ScanController` owns the connected device handles. Starting a scan moves both
//! handles into the [`ScanEngine`]; joining it moves them back. No device handle is
//! ever shared while a scan runs.
//!
//! [`ScanController::run_scan`] is the complete acquisition workflow: it sizes a
//! heatmap from the planned grid, folds every acquired point into it on the calling
//! task, and finalizes a [`ScanResult`] once the scan ends.

use crate::config::Settings;
use crate::error::{AppResult, DeviceStage, ScanError};
use crate::hardware::registry::{MOCK_SPECTROMETER, TCP_SPECTROMETER};
use crate::hardware::{DeviceRegistry, MotorController, Spectrometer};
use crate::heatmap::{Heatmap, RenderOptions};
use crate::result::{ScanImages, ScanParams, ScanResult, SpectrometerMeta};
use crate::scan::{
    CancelToken, ScanDevices, ScanEngine, ScanEvent, ScanHandle, ScanReport, ScanRequest,
    ScanState,
};
use tracing::{info, warn};

/// Outcome of [`ScanController::run_scan`].
#[derive(Debug)]
pub struct ScanOutcome {
    /// Final state, collected points and any device error.
    pub report: ScanReport,
    /// Present when at least one point was collected.
    pub result: Option<ScanResult>,
}

/// Owns devices and runs scans one at a time.
pub struct ScanController {
    settings: Settings,
    registry: DeviceRegistry,
    engine: ScanEngine,
    motor: Option<Box<dyn MotorController>>,
    spectrometer: Option<Box<dyn Spectrometer>>,
    spectrometer_meta: SpectrometerMeta,
    cancel: Option<CancelToken>,
}

impl ScanController {
    /// Controller with no devices connected.
    pub fn new(settings: Settings, registry: DeviceRegistry) -> Self {
        Self {
            settings,
            registry,
            engine: ScanEngine::new(),
            motor: None,
            spectrometer: None,
            spectrometer_meta: SpectrometerMeta::default(),
            cancel: None,
        }
    }

    /// Loaded settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registered motor controller names.
    pub fn available_motors(&self) -> Vec<String> {
        self.registry.available_motors()
    }

    /// Registered spectrometer names.
    pub fn available_spectrometers(&self) -> Vec<String> {
        self.registry.available_spectrometers()
    }

    /// Engine state.
    pub fn state(&self) -> ScanState {
        self.engine.state()
    }

    /// Whether a motor controller is attached and connected.
    pub fn is_motor_connected(&self) -> bool {
        self.motor.as_ref().is_some_and(|m| m.is_connected())
    }

    /// Whether a spectrometer is attached and connected.
    pub fn is_spectrometer_connected(&self) -> bool {
        self.spectrometer.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Builds the named motor controller from the registry and connects it.
    pub async fn connect_motor(&mut self, name: &str) -> AppResult<()> {
        let motor = self.registry.create_motor(name, &self.settings)?;
        self.attach_motor(motor).await
    }

    /// Builds the named spectrometer from the registry and connects it.
    pub async fn connect_spectrometer(&mut self, name: &str) -> AppResult<()> {
        let spectrometer = self.registry.create_spectrometer(name, &self.settings)?;
        self.attach_spectrometer(spectrometer).await
    }

    /// Connects an already constructed motor controller, replacing the current one.
    pub async fn attach_motor(&mut self, mut motor: Box<dyn MotorController>) -> AppResult<()> {
        self.ensure_idle()?;
        self.disconnect_motor().await?;
        motor
            .connect()
            .await
            .map_err(|err| ScanError::device(DeviceStage::Connect, &err))?;
        info!(motor = motor.name(), "Motor controller ready");
        self.motor = Some(motor);
        Ok(())
    }

    /// Connects an already constructed spectrometer, replacing the current one.
    pub async fn attach_spectrometer(
        &mut self,
        mut spectrometer: Box<dyn Spectrometer>,
    ) -> AppResult<()> {
        self.ensure_idle()?;
        self.disconnect_spectrometer().await?;
        spectrometer
            .connect()
            .await
            .map_err(|err| ScanError::device(DeviceStage::Connect, &err))?;
        info!(spectrometer = spectrometer.name(), "Spectrometer ready");
        self.spectrometer_meta = self.describe_spectrometer(spectrometer.name());
        self.spectrometer = Some(spectrometer);
        Ok(())
    }

    /// Disconnects and drops the motor controller, if any.
    pub async fn disconnect_motor(&mut self) -> AppResult<()> {
        self.ensure_idle()?;
        if let Some(mut motor) = self.motor.take() {
            motor
                .disconnect()
                .await
                .map_err(|err| ScanError::device(DeviceStage::Disconnect, &err))?;
        }
        Ok(())
    }

    /// Disconnects and drops the spectrometer, if any.
    pub async fn disconnect_spectrometer(&mut self) -> AppResult<()> {
        self.ensure_idle()?;
        if let Some(mut spectrometer) = self.spectrometer.take() {
            spectrometer
                .disconnect()
                .await
                .map_err(|err| ScanError::device(DeviceStage::Disconnect, &err))?;
        }
        self.spectrometer_meta = SpectrometerMeta::default();
        Ok(())
    }

    /// Disconnects every device, logging failures instead of returning them.
    pub async fn shutdown(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        if let Err(err) = self.disconnect_motor().await {
            warn!(error = %err, "Motor controller did not disconnect cleanly");
        }
        if let Err(err) = self.disconnect_spectrometer().await {
            warn!(error = %err, "Spectrometer did not disconnect cleanly");
        }
    }

    /// Starts a scan with the connected devices.
    ///
    /// # Errors
    /// - [`ScanError::AlreadyRunning`] while a scan is running
    /// - [`ScanError::Configuration`] for an invalid request or a band outside the
    ///   configured limits
    /// - [`ScanError::DeviceNotConnected`] when a device is missing or disconnected
    pub fn start_scan(&mut self, request: ScanRequest) -> AppResult<ScanHandle> {
        self.start_scan_with_cancel(request, CancelToken::new())
    }

    fn start_scan_with_cancel(
        &mut self,
        request: ScanRequest,
        cancel: CancelToken,
    ) -> AppResult<ScanHandle> {
        self.ensure_idle()?;
        request.validate()?;
        self.settings.scan.check_band(request.band)?;
        if !self.is_motor_connected() {
            return Err(ScanError::DeviceNotConnected("Motor controller"));
        }
        if !self.is_spectrometer_connected() {
            return Err(ScanError::DeviceNotConnected("Spectrometer"));
        }

        let (Some(motor), Some(spectrometer)) = (self.motor.take(), self.spectrometer.take())
        else {
            return Err(ScanError::DeviceNotConnected("Motor controller"));
        };
        let devices = ScanDevices {
            motor,
            spectrometer,
        };

        match self.engine.start_with_cancel(request, devices, cancel.clone()) {
            Ok(handle) => {
                self.cancel = Some(cancel);
                Ok(handle)
            }
            Err(rejected) => {
                self.motor = Some(rejected.devices.motor);
                self.spectrometer = Some(rejected.devices.spectrometer);
                Err(rejected.error)
            }
        }
    }

    /// Requests cancellation of the running scan. No-op when nothing runs.
    pub fn stop_scan(&self) {
        if let Some(cancel) = &self.cancel {
            if self.engine.is_running() {
                info!("Scan stop requested");
            }
            cancel.cancel();
        }
    }

    /// Joins a scan started by [`ScanController::start_scan`] and takes the devices
    /// back.
    pub async fn finish_scan(&mut self, handle: ScanHandle) -> AppResult<ScanReport> {
        let (report, devices) = handle.join().await?;
        self.motor = Some(devices.motor);
        self.spectrometer = Some(devices.spectrometer);
        self.cancel = None;
        Ok(report)
    }

    /// Runs a complete scan and finalizes its result.
    ///
    /// `on_event` sees every event after the heatmap has been updated with it.
    /// Cancelling `cancel` stops the scan after the current point; the points
    /// collected so far are still finalized.
    pub async fn run_scan<F>(
        &mut self,
        request: ScanRequest,
        cancel: CancelToken,
        render: &RenderOptions,
        mut on_event: F,
    ) -> AppResult<ScanOutcome>
    where
        F: FnMut(&ScanEvent, &Heatmap),
    {
        let mut handle = self.start_scan_with_cancel(request, cancel)?;

        let mut heatmap = Heatmap::new(request.band);
        heatmap.initialize_grid(&request.generate_planned_points());

        while let Some(event) = handle.next_event().await {
            if let ScanEvent::PointAcquired(point) = &event {
                heatmap.add_point(point);
            }
            on_event(&event, &heatmap);
        }

        let report = self.finish_scan(handle).await?;
        if report.points.is_empty() {
            return Ok(ScanOutcome {
                report,
                result: None,
            });
        }

        let heatmap_png = if heatmap.status().is_renderable() {
            match heatmap.export_png(render) {
                Ok(png) => Some(png),
                Err(err) => {
                    warn!(error = %err, "Heatmap image skipped, scan data kept");
                    None
                }
            }
        } else {
            None
        };
        let (step_x, step_y) = request.effective_steps();
        let params = ScanParams {
            region: Some(request.region),
            step_x,
            step_y,
            spectrometer: self.spectrometer_meta.clone(),
        };
        let images = ScanImages {
            heatmap_png,
            ..ScanImages::default()
        };
        let result = ScanResult::finalize(&report.points, &params, &heatmap, images);

        Ok(ScanOutcome {
            report,
            result: Some(result),
        })
    }

    fn ensure_idle(&self) -> AppResult<()> {
        if self.engine.is_running() {
            return Err(ScanError::AlreadyRunning);
        }
        Ok(())
    }

    fn describe_spectrometer(&self, name: &str) -> SpectrometerMeta {
        let integration_time_ms = match name {
            MOCK_SPECTROMETER => Some(self.settings.mock.acquire_delay_ms as f64),
            TCP_SPECTROMETER => Some(f64::from(self.settings.tcp_spectrometer.exposure_ms)),
            _ => None,
        };
        SpectrometerMeta {
            name: Some(name.to_string()),
            integration_time_ms,
            ..SpectrometerMeta::default()
        }
    }
}
