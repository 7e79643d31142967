#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the grip dynamometer controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Field names are snake_case; the camelCase names used by the host
//!   application's settings file are accepted as aliases.
use serde::Deserialize;
use serde::de::Deserializer;

/// Instrument identity and link parameters.
#[derive(Debug, Deserialize)]
pub struct DeviceCfg {
    /// USB vendor id. Accepts an integer or a hex string such as "0x1a86".
    #[serde(alias = "vendorId", deserialize_with = "de_usb_id")]
    pub vendor_id: u16,
    /// USB product id. Same accepted forms as `vendor_id`.
    #[serde(alias = "productId", deserialize_with = "de_usb_id")]
    pub product_id: u16,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Enumeration poll interval while searching for the device.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_poll_ms() -> u64 {
    1_000
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingCfg {
    /// Overall deadline for discovery + baseline (ms).
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    /// How long an above-threshold reading must hold before the baseline is accepted.
    #[serde(alias = "baselineTimeSetting")]
    pub baseline_settle_ms: u64,
    /// How long a below-threshold run must last to abort baseline confirmation.
    #[serde(alias = "baselineTimeNotSet")]
    pub baseline_drop_ms: u64,
    /// Settle delay between GetCoefficient and SamplingOn.
    #[serde(alias = "samplingDelay")]
    pub sampling_delay_ms: u64,
    /// Length of the capture window once a grip is detected.
    #[serde(alias = "duration")]
    pub duration_ms: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            baseline_settle_ms: 1_000,
            baseline_drop_ms: 500,
            sampling_delay_ms: 300,
            duration_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MeasureCfg {
    /// Raw magnitude above which the hand is considered at rest on the handle.
    #[serde(alias = "baselineThreshold")]
    pub baseline: u16,
    /// Weight that opens the capture window.
    pub trigger: f64,
    /// Weights at or above this value are discarded as artifacts.
    #[serde(alias = "ceilWeight")]
    pub ceil_weight: f64,
    /// Decimal places kept for every weight value.
    #[serde(alias = "bigRound")]
    pub big_round: u8,
}

impl Default for MeasureCfg {
    fn default() -> Self {
        Self {
            baseline: 1_000,
            trigger: 1.0,
            ceil_weight: 150.0,
            big_round: 2,
        }
    }
}

/// Outbound delivery through the job queue.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutboundCfg {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    /// Base of the exponential retry backoff.
    pub retry_delay_ms: u64,
}

impl Default for OutboundCfg {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_attempts: 3,
            timeout_ms: 5_000,
            retry_delay_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
    /// Directory receiving one JSON record per measurement cycle.
    pub results_dir: String,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            results_dir: "results".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub device: DeviceCfg,
    #[serde(default)]
    pub timing: TimingCfg,
    #[serde(default)]
    pub measure: MeasureCfg,
    #[serde(default)]
    pub outbound: OutboundCfg,
    #[serde(default)]
    pub storage: StorageCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UsbIdToml {
    Int(u32),
    Text(String),
}

fn de_usb_id<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let raw = UsbIdToml::deserialize(deserializer)?;
    let value = match raw {
        UsbIdToml::Int(v) => v,
        UsbIdToml::Text(s) => {
            let t = s.trim();
            let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => t.parse::<u32>(),
            };
            parsed.map_err(|e| D::Error::custom(format!("invalid usb id {s:?}: {e}")))?
        }
    };
    u16::try_from(value).map_err(|_| D::Error::custom(format!("usb id {value} exceeds 0xffff")))
}

/// Largest supported number of decimal places for weights.
pub const MAX_BIG_ROUND: u8 = 6;

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        if self.device.baud_rate == 0 {
            eyre::bail!("device.baud_rate must be > 0");
        }
        if self.device.poll_ms == 0 {
            eyre::bail!("device.poll_ms must be >= 1");
        }

        // Timing
        if self.timing.timeout_ms == 0 {
            eyre::bail!("timing.timeout_ms must be >= 1");
        }
        if self.timing.timeout_ms > 60 * 60 * 1000 {
            eyre::bail!("timing.timeout_ms is unreasonably large (>1h)");
        }
        if self.timing.baseline_settle_ms == 0 {
            eyre::bail!("timing.baseline_settle_ms must be >= 1");
        }
        if self.timing.baseline_drop_ms == 0 {
            eyre::bail!("timing.baseline_drop_ms must be >= 1");
        }
        if self.timing.duration_ms == 0 {
            eyre::bail!("timing.duration_ms must be >= 1");
        }

        // Measure
        if !self.measure.trigger.is_finite() || self.measure.trigger < 0.0 {
            eyre::bail!("measure.trigger must be a finite value >= 0");
        }
        if !self.measure.ceil_weight.is_finite() || self.measure.ceil_weight <= 0.0 {
            eyre::bail!("measure.ceil_weight must be a finite value > 0");
        }
        if self.measure.ceil_weight <= self.measure.trigger {
            eyre::bail!("measure.ceil_weight must be greater than measure.trigger");
        }
        if self.measure.big_round > MAX_BIG_ROUND {
            eyre::bail!("measure.big_round must be in [0, {MAX_BIG_ROUND}]");
        }

        // Outbound
        if self.outbound.concurrency == 0 {
            eyre::bail!("outbound.concurrency must be >= 1");
        }
        if self.outbound.max_attempts == 0 {
            eyre::bail!("outbound.max_attempts must be >= 1");
        }
        if self.outbound.timeout_ms == 0 {
            eyre::bail!("outbound.timeout_ms must be >= 1");
        }

        // Storage
        if self.storage.results_dir.trim().is_empty() {
            eyre::bail!("storage.results_dir must not be empty");
        }

        Ok(())
    }
}
