//! Bottle sorter controller
//!
//! This crate drives a waste-sorting station: a camera watches the input slot, a
//! photo-interrupter signals that an item is in position, an object detector classifies
//! the current frame, and one of three motors routes the item into the matching bin while
//! the operator display shows the result and counts down back to idle.
//!
//! # Architecture
//!
//! Three threads cooperate:
//!
//! 1. **Acquisition** (`ingest::FrameSource`): reads the camera at ~30 fps and publishes
//!    each frame atomically into a `frame::LatestFrame` cell.
//! 2. **Trigger loop** (`trigger::TriggerLoop`): polls the sensor, snapshots the latest
//!    frame, classifies it, resolves a `resolve::SortCategory`, and is the only caller of
//!    `actuator::ActuatorController::fire`.
//! 3. **Display loop** (`ui::UiLoop`): renders status updates and runs the cooperative
//!    `ui::DisplayCountdownTimer`.
//!
//! `shutdown::SessionShutdown` tears everything down exactly once and leaves every motor
//! pin LOW.
//!
//! # Module Structure
//!
//! - `config`: `SorterConfig` (file + environment)
//! - `frame`, `ingest`: frames and camera sources
//! - `detect`: detector backends and detections
//! - `resolve`: detections to sort category
//! - `gpio`, `actuator`: pins and motor pulses
//! - `audio`, `ui`, `annotate`: operator feedback
//! - `trigger`, `app`: the control loop and its wiring

pub mod actuator;
pub mod annotate;
pub mod app;
pub mod audio;
pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod gpio;
pub mod ingest;
pub mod resolve;
pub mod shutdown;
pub mod trigger;
pub mod ui;

pub use actuator::{ActuatorController, Direction, MotorChannel, MotorPins, PulseOutcome};
pub use app::{Devices, Sorter};
pub use config::SorterConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend};
pub use frame::{Frame, LatestFrame};
pub use ingest::{CaptureDevice, FrameSource};
pub use resolve::{CapState, CategoryResolver, ProductFamily, ResolverConfig, SortCategory};
pub use shutdown::{SessionShutdown, ShutdownSignal};
pub use trigger::{TriggerCycle, TriggerLoop, TriggerState, TriggerStats};
