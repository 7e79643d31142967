//! Human-readable error descriptions and structured JSON error formatting.

use grip_core::error::{CycleFailed, ErrorCode};

/// Exit codes for cycle failures start here; `10 + taxonomy code`.
pub const CYCLE_EXIT_BASE: i32 = 10;

fn explain(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::TempFileError => {
            "What happened: The result record could not be written.\nLikely causes: storage.results_dir is read-only, on a full disk, or not creatable.\nHow to fix: Point storage.results_dir at a writable directory."
        }
        ErrorCode::DeviceNotFound => {
            "What happened: No dynamometer with the configured USB ids was found before the deadline.\nLikely causes: Device unplugged, wrong [device] vendor_id/product_id, or missing USB serial driver.\nHow to fix: Plug the instrument in, check the ids with `grip self-check`, then retry."
        }
        ErrorCode::GenericDeviceError => {
            "What happened: The serial link to the dynamometer failed.\nLikely causes: Port already in use by another program, cable fault, or a permissions problem.\nHow to fix: Close other serial consoles, reconnect the cable, and check access to the port."
        }
        ErrorCode::CoefficientOrFrameError => {
            "What happened: The instrument did not report a usable coefficient or sent a malformed frame.\nLikely causes: Wrong baud rate, firmware not responding, or line noise.\nHow to fix: Check device.baud_rate, power-cycle the instrument, and retry."
        }
        ErrorCode::GenericPluginError => {
            "What happened: A command arrived in a state that cannot handle it.\nLikely causes: measureSamplingOn sent before baseline_ok.\nHow to fix: Wait for baseline_ok before starting a new capture."
        }
        ErrorCode::OverallTimeout => {
            "What happened: The measurement deadline elapsed before a baseline was confirmed.\nLikely causes: The handle was not at rest, or timing.timeout_ms is too low.\nHow to fix: Keep the handle still after device_found, or raise timing.timeout_ms."
        }
        ErrorCode::NoOrInvalidData => {
            "What happened: The capture window closed without a valid sample.\nLikely causes: Grip below measure.trigger, or every reading at or above measure.ceil_weight.\nHow to fix: Squeeze harder, or review measure.trigger and measure.ceil_weight."
        }
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(failed) = err.downcast_ref::<CycleFailed>() {
        return format!("{}\nDetail: {}", explain(failed.code), failed.description);
    }

    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config <FILE> pointing at a readable TOML file. ({msg})"
        );
    }

    if lower.contains("parse config toml") || lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid or incomplete.\nLikely causes: Missing [device] ids or out-of-range values.\nHow to fix: Edit the TOML config and try again. ({msg})"
        );
    }

    if lower.contains("enumerate serial ports") {
        return format!(
            "What happened: Serial ports could not be listed.\nLikely causes: No permission to query USB devices.\nHow to fix: Run with access to the serial subsystem. ({msg})"
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: `10 + code` for cycle failures, 1 for anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<CycleFailed>() {
        Some(failed) => CYCLE_EXIT_BASE + i32::from(failed.code.as_u16()),
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(failed) = err.downcast_ref::<CycleFailed>() {
        return json!({
            "reason": failed.code.name(),
            "code": failed.code.as_u16(),
            "details": failed.description,
            "message": humanize(err),
        })
        .to_string();
    }

    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
