//! Status events produced by the controller and routed by the gateway.

use serde_json::{Value, json};

use crate::error::ErrorCode;
use crate::fixed_point::Weight;

/// Code carried by `baseline_stop`.
pub const BASELINE_STOP_CODE: u16 = 1001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    DeviceFound,
    BaselineOk,
    /// Baseline candidate dropped; the detector keeps listening.
    BaselineStop,
    MeasureReceived {
        value: Weight,
    },
    MeasureFinish {
        raw: Vec<Weight>,
        avg: Weight,
        max: Weight,
    },
    Timeout,
    AppHide,
    AppShow,
    ShowGauge,
    HideGauge,
    SamplingOn,
    MeasureStop,
    Error {
        code: ErrorCode,
        description: String,
    },
}

impl Status {
    /// Value of the `message` field on the wire.
    pub fn message(&self) -> &'static str {
        match self {
            Self::DeviceFound => "device_found",
            Self::BaselineOk => "baseline_ok",
            Self::BaselineStop => "baseline_stop",
            Self::MeasureReceived { .. } => "measure_received",
            Self::MeasureFinish { .. } => "measure_finish",
            Self::Timeout => "timeout",
            Self::AppHide => "app_hide",
            Self::AppShow => "app_show",
            Self::ShowGauge => "show_gauge",
            Self::HideGauge => "hide_gauge",
            Self::SamplingOn => "measureSamplingOn",
            Self::MeasureStop => "measure_stop",
            Self::Error { .. } => "error",
        }
    }

    /// Statuses that close a measurement cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MeasureFinish { .. }
                | Self::Timeout
                | Self::AppHide
                | Self::MeasureStop
                | Self::Error { .. }
        )
    }

    pub fn to_json(&self) -> Value {
        let message = self.message();
        match self {
            Self::BaselineStop => json!({ "message": message, "code": BASELINE_STOP_CODE }),
            Self::MeasureReceived { value } => json!({ "message": message, "value": value.to_f64() }),
            Self::MeasureFinish { raw, avg, max } => json!({
                "message": message,
                "rawMeasures": raw.iter().map(|w| w.to_f64()).collect::<Vec<_>>(),
                "avg": avg.to_f64(),
                "max": max.to_f64(),
            }),
            Self::Error { code, description } => json!({
                "message": message,
                "code": code.as_u16(),
                "description": description,
            }),
            _ => json!({ "message": message }),
        }
    }
}
