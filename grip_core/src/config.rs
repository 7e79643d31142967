//! Runtime configuration for the controller and the outbound queue.
//!
//! These are the structs the core works with. They are separate from the
//! TOML-deserialized schema in `grip_config`; see `conversions`.

use std::time::Duration;

use crate::baseline::BaselineSettings;
use crate::measurement::MeasureSettings;

/// USB identity and link parameters of the dynamometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch {
    pub vendor_id: u16,
    pub product_id: u16,
    pub baud_rate: u32,
    /// Enumeration poll interval while searching.
    pub poll_ms: u64,
}

impl Default for DeviceMatch {
    fn default() -> Self {
        Self {
            vendor_id: 0x1a86,
            product_id: 0x7523,
            baud_rate: 115_200,
            poll_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerCfg {
    pub device: DeviceMatch,
    /// Outer deadline for discovery and baseline.
    pub timeout_ms: u64,
    /// Wait after `GetCoefficient` before switching sampling on.
    pub sampling_delay_ms: u64,
    pub baseline: BaselineSettings,
    pub measure: MeasureSettings,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            device: DeviceMatch::default(),
            timeout_ms: 30_000,
            sampling_delay_ms: 300,
            baseline: BaselineSettings {
                threshold: 1000,
                settle_ms: 1000,
                drop_ms: 500,
            },
            measure: MeasureSettings::new(1.0, 150.0, 2, 5000),
        }
    }
}

/// Queue settings shared by every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCfg {
    pub concurrency: usize,
    /// Base of the exponential retry backoff.
    pub retry_delay: Duration,
}

impl Default for QueueCfg {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Per-message delivery policy used by the gateway when enqueuing sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(5),
        }
    }
}
