#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Measurement controller for a serial grip-strength dynamometer
//! (hardware-agnostic).
//!
//! All device access goes through the `grip_traits` seams (`Enumerator`,
//! `Connector`, `Link`, `Clock`), so the same state machine drives real
//! hardware, the simulator and test fakes.
//!
//! ## Architecture
//!
//! - **Wire format**: command bytes and response decoding (`codec`, `framer`)
//! - **Weights**: fixed-point coefficient and weight arithmetic (`fixed_point`)
//! - **Baseline**: two-timer debounce on raw magnitudes (`baseline`)
//! - **Measurement**: bounded capture window and summary (`measurement`)
//! - **Controller**: discovery → connect → initialize → baseline → measure → teardown (`controller`)
//! - **Outbound**: priority/retry job queue and the messaging gateway (`job_queue`, `gateway`)
//! - **Event loop**: `runner` multiplexes commands, bytes and timers on one thread
//!
//! ## Fixed-Point Arithmetic
//!
//! Coefficients are integer millionths and weights integer `10^-precision`
//! units. Each weight is one exact product and a single half-up rounding;
//! floats appear only in JSON payloads.

pub mod baseline;
pub mod codec;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod fixed_point;
pub mod framer;
pub mod gateway;
pub mod hw_error;
pub mod job_queue;
pub mod measurement;
pub mod mocks;
pub mod record;
pub mod runner;
pub mod status;
pub mod timer;

pub use baseline::{BaselineDetector, BaselineEvent, BaselineSettings, BaselineState};
pub use codec::Command;
pub use config::{ControllerCfg, DeviceMatch, QueueCfg, SendPolicy};
pub use controller::{ControllerState, DeviceController, TeardownCause};
pub use error::{ControllerError, CycleFailed, ErrorCode, Result};
pub use fixed_point::{Coefficient, Weight};
pub use gateway::{Display, InboundCommand, MessagingGateway, OutboundChannel};
pub use job_queue::{JobEvent, JobOptions, JobQueue, QueueStats};
pub use measurement::{MeasureSettings, MeasurementSession};
pub use record::{FileResultStore, ResultRecord, ResultStore};
pub use status::Status;
