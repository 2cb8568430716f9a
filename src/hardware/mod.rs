//! Device capabilities and drivers.
//!
//! - [`capabilities`]: `MotorController` and `Spectrometer` traits plus [`Spectrum`]
//! - [`mock`]: simulated stage and spectrometer
//! - [`tcp_spectrometer`]: ASCII-over-TCP spectrometer driver
//! - [`registry`]: name-based device construction

pub mod capabilities;
pub mod mock;
pub mod registry;
pub mod tcp_spectrometer;

pub use capabilities::{MotorController, Spectrometer, Spectrum};
pub use mock::{MockMotorController, MockSpectrometer};
pub use registry::DeviceRegistry;
pub use tcp_spectrometer::TcpSpectrometer;
