//! Scan acquisition engine.
//!
//! One scan runs on its own tokio task. The task owns the motor and the spectrometer
//! for the whole scan, walks the planned coordinates in order and reports through an
//! unbounded event channel:
//!
//! ```text
//! PointAcquired(p0) → Progress → Eta → PointAcquired(p1) → ... → Finished(points)
//! ```
//!
//! A device failure inserts a single `Error` event before `Finished`. Cancellation
//! is cooperative: the [`CancelToken`] is checked between points, never while a move
//! or an acquisition is in flight.
//!
//! State is published on a `watch` channel:
//!
//! ```text
//! Idle → Running → {Completed, Stopped} → Idle (on join)
//! ```

use crate::error::{DeviceStage, ScanError};
use crate::hardware::{MotorController, Spectrometer};
use crate::scan::{ScanPlan, ScanPoint, ScanRequest};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No scan, or the last one has been joined.
    Idle,
    /// Acquiring points.
    Running,
    /// Every planned point was acquired.
    Completed,
    /// Cancelled, aborted by a device error, or nothing to scan.
    Stopped,
}

/// Notifications emitted by a running scan, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A point with its spectrum.
    PointAcquired(ScanPoint),
    /// Percentage of planned points processed, rounded.
    Progress(u8),
    /// Remaining time as `HH:MM:SS`.
    Eta(String),
    /// A device call failed; `Finished` follows.
    Error {
        /// The failing call.
        stage: DeviceStage,
        /// Driver error text.
        message: String,
    },
    /// Terminal event carrying every point collected, possibly none.
    Finished(Vec<ScanPoint>),
}

/// Cooperative cancellation flag shared between the caller and the scan task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Calling it after the scan ended has no effect.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The two device handles a scan takes ownership of.
pub struct ScanDevices {
    /// Stage driver.
    pub motor: Box<dyn MotorController>,
    /// Spectrometer driver.
    pub spectrometer: Box<dyn Spectrometer>,
}

impl fmt::Debug for ScanDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanDevices")
            .field("motor", &self.motor.name())
            .field("spectrometer", &self.spectrometer.name())
            .finish()
    }
}

/// A refused start. The devices are handed back untouched.
#[derive(Debug)]
pub struct StartRejected {
    /// Why the start was refused.
    pub error: ScanError,
    /// The devices, returned untouched.
    pub devices: ScanDevices,
}

impl From<StartRejected> for ScanError {
    fn from(rejected: StartRejected) -> Self {
        rejected.error
    }
}

/// Outcome of a joined scan.
#[derive(Debug)]
pub struct ScanReport {
    /// `Completed` or `Stopped`.
    pub state: ScanState,
    /// Points acquired, in acquisition order.
    pub points: Vec<ScanPoint>,
    /// Number of planned points.
    pub planned: usize,
    /// The device error that aborted the scan, if any.
    pub error: Option<ScanError>,
    /// Wall time of the scan.
    pub elapsed: Duration,
}

impl ScanReport {
    /// True when the scan was stopped by its token.
    pub fn was_cancelled(&self) -> bool {
        self.state == ScanState::Stopped && self.error.is_none() && self.points.len() < self.planned
    }
}

/// Runs at most one scan at a time.
#[derive(Debug, Clone)]
pub struct ScanEngine {
    state: Arc<watch::Sender<ScanState>>,
}

impl Default for ScanEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanEngine {
    /// Idle engine.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            state: Arc::new(state),
        }
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Whether a scan is in progress.
    pub fn is_running(&self) -> bool {
        self.state() == ScanState::Running
    }

    /// Validates `request` and spawns the acquisition task.
    ///
    /// Must be called from within a tokio runtime. The request is rejected with a
    /// configuration error when invalid and with [`ScanError::AlreadyRunning`]
    /// while another scan is running; in both cases the state is unchanged and the
    /// devices are returned.
    pub fn start(
        &self,
        request: ScanRequest,
        devices: ScanDevices,
    ) -> Result<ScanHandle, StartRejected> {
        self.start_with_cancel(request, devices, CancelToken::new())
    }

    /// Like [`ScanEngine::start`], observing a caller-provided cancellation token.
    pub fn start_with_cancel(
        &self,
        request: ScanRequest,
        devices: ScanDevices,
        cancel: CancelToken,
    ) -> Result<ScanHandle, StartRejected> {
        if let Err(error) = request.validate() {
            return Err(StartRejected { error, devices });
        }

        let claimed = self.state.send_if_modified(|state| {
            if *state == ScanState::Running {
                false
            } else {
                *state = ScanState::Running;
                true
            }
        });
        if !claimed {
            return Err(StartRejected {
                error: ScanError::AlreadyRunning,
                devices,
            });
        }

        let plan = request.plan();
        let total = plan.len();
        let (step_x, step_y) = request.effective_steps();
        info!(
            total,
            step_x,
            step_y,
            band = %request.band,
            "Scan started"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = ScanWorker {
            plan,
            devices,
            cancel: cancel.clone(),
            events: events_tx,
            state: Arc::clone(&self.state),
        };
        let task = tokio::spawn(worker.run());

        Ok(ScanHandle {
            events: events_rx,
            cancel,
            task,
            total,
            state: Arc::clone(&self.state),
        })
    }
}

/// Caller side of a running scan.
pub struct ScanHandle {
    events: mpsc::UnboundedReceiver<ScanEvent>,
    cancel: CancelToken,
    task: JoinHandle<(ScanReport, ScanDevices)>,
    total: usize,
    state: Arc<watch::Sender<ScanState>>,
}

impl ScanHandle {
    /// Number of planned points.
    pub fn total_points(&self) -> usize {
        self.total
    }

    /// Next event, or `None` once `Finished` has been consumed and the task ended.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Clone of the token observed by the scan.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stops the scan before its next point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the scan task, returns the engine to `Idle` and hands back the
    /// devices.
    pub async fn join(self) -> Result<(ScanReport, ScanDevices), ScanError> {
        let outcome = self.task.await;
        let task_failed = outcome.is_err();
        // After a normal exit a `Running` state belongs to a later scan
        self.state.send_if_modified(|state| {
            if *state == ScanState::Running && !task_failed {
                false
            } else {
                *state = ScanState::Idle;
                true
            }
        });
        outcome.map_err(|err| {
            error!(error = %err, "Scan task failed");
            ScanError::Worker(err.to_string())
        })
    }
}

struct ScanWorker {
    plan: ScanPlan,
    devices: ScanDevices,
    cancel: CancelToken,
    events: mpsc::UnboundedSender<ScanEvent>,
    state: Arc<watch::Sender<ScanState>>,
}

impl ScanWorker {
    fn emit(&self, event: ScanEvent) {
        // The consumer may have dropped its receiver; the scan still runs to the end
        let _ = self.events.send(event);
    }

    async fn run(mut self) -> (ScanReport, ScanDevices) {
        let started = Instant::now();
        let total = self.plan.len();
        let mut points = Vec::with_capacity(total);
        let mut failure = None;
        let mut cancelled = false;

        let coordinates: Vec<(f64, f64)> = self.plan.coordinates().collect();
        for (x, y) in coordinates {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            if let Err(err) = self.devices.motor.move_to(x, y).await {
                failure = Some(ScanError::device(DeviceStage::Move, &err));
                break;
            }
            let spectrum = match self.devices.spectrometer.acquire_spectrum().await {
                Ok(spectrum) => spectrum,
                Err(err) => {
                    failure = Some(ScanError::device(DeviceStage::Acquire, &err));
                    break;
                }
            };

            let point = ScanPoint::acquired(x, y, spectrum);
            points.push(point.clone());
            let processed = points.len();
            debug!(x, y, processed, total, "Point acquired");

            self.emit(ScanEvent::PointAcquired(point));
            self.emit(ScanEvent::Progress(progress_percent(processed, total)));
            let eta = estimate_remaining(started.elapsed(), processed, total);
            self.emit(ScanEvent::Eta(format_eta(eta)));
        }

        if let Some(err) = &failure {
            warn!(error = %err, collected = points.len(), "Scan aborted by device error");
            if let ScanError::Device { stage, message } = err {
                self.emit(ScanEvent::Error {
                    stage: *stage,
                    message: message.clone(),
                });
            }
        }

        let state = if failure.is_none() && !cancelled && total > 0 {
            ScanState::Completed
        } else {
            ScanState::Stopped
        };
        if cancelled {
            info!(collected = points.len(), total, "Scan cancelled");
        }
        if total == 0 {
            info!("Scan region holds no grid points");
        }

        // Terminal state is visible before consumers see Finished
        self.state.send_replace(state);
        self.emit(ScanEvent::Finished(points.clone()));
        let elapsed = started.elapsed();
        info!(?state, collected = points.len(), ?elapsed, "Scan finished");

        let report = ScanReport {
            state,
            points,
            planned: total,
            error: failure,
            elapsed,
        };
        (report, self.devices)
    }
}

/// `round(processed / total * 100)`, 0 for an empty plan.
pub fn progress_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Linear extrapolation of the mean time per point. Zero before the first point.
pub fn estimate_remaining(elapsed: Duration, processed: usize, total: usize) -> Duration {
    if processed == 0 {
        return Duration::ZERO;
    }
    let remaining = total.saturating_sub(processed) as f64;
    elapsed.mul_f64(remaining / processed as f64)
}

/// Formats whole seconds as `HH:MM:SS`; hours are not wrapped.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockMotorController, MockSpectrometer, Spectrum};
    use crate::heatmap::Band;
    use crate::scan::ScanRegion;

    fn devices() -> ScanDevices {
        let spectrum = Spectrum::new(vec![0.0, 500.0, 1000.0], vec![1.0, 2.0, 3.0]).unwrap();
        ScanDevices {
            motor: Box::new(MockMotorController::default()),
            spectrometer: Box::new(MockSpectrometer::fixed(spectrum)),
        }
    }

    async fn connected(mut devices: ScanDevices) -> ScanDevices {
        devices.motor.connect().await.unwrap();
        devices.spectrometer.connect().await.unwrap();
        devices
    }

    fn request(width: f64, height: f64) -> ScanRequest {
        ScanRequest::new(
            ScanRegion::new(0.0, 0.0, width, height),
            1.0,
            1.0,
            Band::new(400.0, 1000.0).unwrap(),
        )
    }

    async fn drain(handle: &mut ScanHandle) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_progress_and_eta_formatting() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 0);

        assert_eq!(estimate_remaining(Duration::from_secs(10), 0, 5), Duration::ZERO);
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 2, 6),
            Duration::from_secs(20)
        );
        assert_eq!(format_eta(Duration::from_millis(3_723_900)), "01:02:03");
        assert_eq!(format_eta(Duration::ZERO), "00:00:00");
    }

    #[tokio::test]
    async fn test_event_order_for_complete_scan() {
        let engine = ScanEngine::new();
        let mut handle = engine.start(request(2.0, 2.0), connected(devices()).await).unwrap();
        assert_eq!(engine.state(), ScanState::Running);
        assert_eq!(handle.total_points(), 4);

        let events = drain(&mut handle).await;
        // 4 points x (point, progress, eta) + finished
        assert_eq!(events.len(), 13);
        assert!(matches!(events[0], ScanEvent::PointAcquired(ref p) if (p.x, p.y) == (0.0, 0.0)));
        assert_eq!(events[1], ScanEvent::Progress(25));
        assert!(matches!(events[2], ScanEvent::Eta(_)));
        assert!(matches!(events[3], ScanEvent::PointAcquired(ref p) if (p.x, p.y) == (1.0, 0.0)));
        assert!(matches!(events[6], ScanEvent::PointAcquired(ref p) if (p.x, p.y) == (0.0, 1.0)));
        assert_eq!(events[10], ScanEvent::Progress(100));
        match &events[12] {
            ScanEvent::Finished(points) => assert_eq!(points.len(), 4),
            other => panic!("expected Finished, got {other:?}"),
        }

        let (report, devices) = handle.join().await.unwrap();
        assert_eq!(report.state, ScanState::Completed);
        assert!(devices.motor.is_connected());
        assert!(report.error.is_none());
        assert_eq!(engine.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_zero_point_scan_stops_immediately() {
        let engine = ScanEngine::new();
        let mut handle = engine.start(request(0.0, 3.0), connected(devices()).await).unwrap();
        let events = drain(&mut handle).await;
        assert_eq!(events, vec![ScanEvent::Finished(Vec::new())]);
        let (report, _) = handle.join().await.unwrap();
        assert_eq!(report.state, ScanState::Stopped);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let engine = ScanEngine::new();
        let motor = MockMotorController::new(Duration::from_millis(20));
        let first = ScanDevices {
            motor: Box::new(motor),
            ..devices()
        };
        let handle = engine.start(request(2.0, 2.0), connected(first).await).unwrap();

        let rejected = engine
            .start(request(2.0, 2.0), devices())
            .err()
            .unwrap();
        assert!(matches!(rejected.error, ScanError::AlreadyRunning));
        assert_eq!(rejected.devices.motor.name(), "Dummy Motor Controller");

        handle.cancel();
        handle.join().await.unwrap();
        assert!(engine.start(request(1.0, 1.0), connected(devices()).await).is_ok());
    }

    #[tokio::test]
    async fn test_joining_earlier_scan_keeps_later_one_running() {
        let engine = ScanEngine::new();
        let mut first = engine.start(request(1.0, 1.0), connected(devices()).await).unwrap();
        drain(&mut first).await;
        assert_eq!(engine.state(), ScanState::Completed);

        let slow = ScanDevices {
            motor: Box::new(MockMotorController::new(Duration::from_millis(50))),
            ..devices()
        };
        let second = engine.start(request(3.0, 3.0), connected(slow).await).unwrap();
        first.join().await.unwrap();
        assert_eq!(engine.state(), ScanState::Running);
        assert!(matches!(
            engine.start(request(1.0, 1.0), devices()).err().unwrap().error,
            ScanError::AlreadyRunning
        ));

        second.cancel();
        second.join().await.unwrap();
        assert_eq!(engine.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_request_never_runs() {
        let engine = ScanEngine::new();
        let mut state = engine.subscribe_state();
        let rejected = engine
            .start(request(-1.0, 2.0), devices())
            .err()
            .unwrap();
        assert!(matches!(rejected.error, ScanError::Configuration(_)));
        assert_eq!(engine.state(), ScanState::Idle);
        assert!(!state.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_move_failure_keeps_partial_points() {
        let engine = ScanEngine::new();
        let failing = ScanDevices {
            motor: Box::new(MockMotorController::default().fail_on_move(3)),
            ..devices()
        };
        let mut handle = engine.start(request(2.0, 2.0), connected(failing).await).unwrap();
        let events = drain(&mut handle).await;

        let error_at = events
            .iter()
            .position(|e| matches!(e, ScanEvent::Error { stage: DeviceStage::Move, .. }))
            .unwrap();
        assert_eq!(error_at, events.len() - 2);
        assert!(matches!(events.last(), Some(ScanEvent::Finished(points)) if points.len() == 2));

        let (report, _) = handle.join().await.unwrap();
        assert_eq!(report.state, ScanState::Stopped);
        assert_eq!(report.error.as_ref().and_then(|e| e.stage()), Some(DeviceStage::Move));
        assert!(!report.was_cancelled());
    }
}
