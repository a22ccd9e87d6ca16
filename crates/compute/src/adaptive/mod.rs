//! Adaptive controller: telemetry in, scheduling parameters out.
//!
//! - `mode`: processing mode with recovery hysteresis
//! - `emergency`: two-of-N emergency trigger with minimum dwell
//! - `params`: the immutable parameter set and its pure derivation
//! - `controller`: ties the three together on the update cadence

mod controller;
pub mod emergency;
pub mod mode;
mod params;

pub use controller::{AdaptiveController, ControllerEvent};
pub use emergency::{EmergencyDetector, EmergencyTransition};
pub use mode::{ModeSignal, ModeTracker};
pub use params::AdaptiveParameters;
