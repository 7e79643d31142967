//! `From` implementations bridging `grip_config` types to `grip_core` types.

use std::time::Duration;

use crate::baseline::BaselineSettings;
use crate::config::{ControllerCfg, DeviceMatch, QueueCfg, SendPolicy};
use crate::measurement::MeasureSettings;

impl From<&grip_config::DeviceCfg> for DeviceMatch {
    fn from(c: &grip_config::DeviceCfg) -> Self {
        Self {
            vendor_id: c.vendor_id,
            product_id: c.product_id,
            baud_rate: c.baud_rate,
            poll_ms: c.poll_ms,
        }
    }
}

impl From<&grip_config::Config> for ControllerCfg {
    fn from(c: &grip_config::Config) -> Self {
        Self {
            device: DeviceMatch::from(&c.device),
            timeout_ms: c.timing.timeout_ms,
            sampling_delay_ms: c.timing.sampling_delay_ms,
            baseline: BaselineSettings {
                threshold: c.measure.baseline,
                settle_ms: c.timing.baseline_settle_ms,
                drop_ms: c.timing.baseline_drop_ms,
            },
            measure: MeasureSettings::new(
                c.measure.trigger,
                c.measure.ceil_weight,
                c.measure.big_round,
                c.timing.duration_ms,
            ),
        }
    }
}

impl From<&grip_config::OutboundCfg> for QueueCfg {
    fn from(c: &grip_config::OutboundCfg) -> Self {
        Self {
            concurrency: c.concurrency.max(1),
            retry_delay: Duration::from_millis(c.retry_delay_ms),
        }
    }
}

impl From<&grip_config::OutboundCfg> for SendPolicy {
    fn from(c: &grip_config::OutboundCfg) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            timeout: Duration::from_millis(c.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_maps_onto_runtime_structs() {
        let cfg = grip_config::load_toml(
            r#"
            [device]
            vendorId = "0x1a86"
            productId = 29987
            [timing]
            baselineTimeSetting = 800
            duration = 3000
            [measure]
            baseline = 1200
            trigger = 0.5
            bigRound = 1
            [outbound]
            concurrency = 2
            retry_delay_ms = 50
            "#,
        )
        .expect("parse");
        let c = ControllerCfg::from(&cfg);
        assert_eq!(c.device.vendor_id, 0x1a86);
        assert_eq!(c.device.product_id, 29987);
        assert_eq!(c.baseline.threshold, 1200);
        assert_eq!(c.baseline.settle_ms, 800);
        assert_eq!(c.measure.duration_ms, 3000);
        assert_eq!(c.measure.trigger.to_string(), "0.5");
        let q = QueueCfg::from(&cfg.outbound);
        assert_eq!(q.concurrency, 2);
        assert_eq!(q.retry_delay, Duration::from_millis(50));
        assert_eq!(SendPolicy::from(&cfg.outbound).max_attempts, 3);
    }
}
