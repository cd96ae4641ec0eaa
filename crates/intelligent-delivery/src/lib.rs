//! Intelligent delivery: quiet hours, consent gating, and run throttling.

#![warn(clippy::unwrap_used)]

pub mod gate;
pub mod quiet_hours;
pub mod throttle;

pub use gate::{DeliveryGate, GateDecision};
pub use quiet_hours::is_quiet_hours;
pub use throttle::RunThrottle;
