//! Maps `Box<dyn Error>` from trait boundaries to the controller taxonomy.
//!
//! The traits in `grip_traits` use `Box<dyn Error + Send + Sync>` so any
//! backend can plug in; this module converts those into `ControllerError`,
//! with an optional feature-gated path for `grip_hardware::HwError` downcasting.

use crate::error::ControllerError;

/// Map a trait-boundary error to a typed `ControllerError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ControllerError {
    #[cfg(feature = "hardware-errors")]
    {
        use grip_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::NotFound(_) => ControllerError::DeviceNotFound,
                HwError::AlreadyOpen(_) => ControllerError::PortAlreadyOpen,
                other => ControllerError::Device(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("not found") || lower.contains("no such file") {
        ControllerError::DeviceNotFound
    } else if lower.contains("busy") || lower.contains("already open") {
        ControllerError::PortAlreadyOpen
    } else {
        ControllerError::Device(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback_classifies_common_messages() {
        let e = std::io::Error::other("device not found");
        assert_eq!(map_hw_error(&e), ControllerError::DeviceNotFound);

        let e = std::io::Error::other("resource busy");
        assert_eq!(map_hw_error(&e), ControllerError::PortAlreadyOpen);

        let e = std::io::Error::other("broken pipe");
        assert_eq!(
            map_hw_error(&e),
            ControllerError::Device("broken pipe".to_string())
        );
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_errors_are_downcast() {
        use grip_hardware::error::HwError;
        let e = HwError::NotFound("/dev/ttyUSB9".into());
        assert_eq!(map_hw_error(&e), ControllerError::DeviceNotFound);
        let e = HwError::Closed;
        assert!(matches!(map_hw_error(&e), ControllerError::Device(_)));
    }
}
