//! Instrument backends for the grip controller.
//!
//! The simulator is always built. The real USB serial backend sits behind
//! the `hardware` feature.

pub mod error;
pub mod sim;

#[cfg(feature = "hardware")]
pub mod serial;

pub use error::HwError;
pub use sim::{GripProfile, SIM_PATH, SimulatedDynamometer};

#[cfg(feature = "hardware")]
pub use serial::{SerialConnector, SerialEnumerator};
