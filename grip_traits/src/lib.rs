//! Collaborator seams for the grip dynamometer controller.
//!
//! The controller never touches a serial port or the OS device list directly;
//! it goes through these traits so the same state machine runs against real
//! hardware, the simulator and test fakes.

pub mod clock;

pub use clock::{Clock, MonotonicClock};

#[cfg(any(test, feature = "test-util"))]
pub use clock::test_clock::ManualClock;

/// Tag the controller hands to [`Connector::open`]; every chunk read from
/// that link carries it.
pub type LinkId = u64;

/// Bytes read from one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub link: LinkId,
    pub bytes: Vec<u8>,
}

/// An open, exclusively owned connection to the instrument.
///
/// Bytes received from the instrument do not flow through this trait; the
/// connector forwards them to the event loop out of band as [`Chunk`]s.
pub trait Link {
    /// Write one command. Returns once the bytes were handed to the OS.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Release the port. Calling it twice is allowed and must not fail.
    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Opens serial links (8-N-1 at the requested baud rate).
pub trait Connector {
    /// Open `path`. Bytes read from the link are tagged with `link`.
    fn open(
        &mut self,
        path: &str,
        baud_rate: u32,
        link: LinkId,
    ) -> Result<Box<dyn Link>, Box<dyn std::error::Error + Send + Sync>>;
}

/// A serial device whose USB identifiers matched the configured pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMatch {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Lists connected serial devices.
pub trait Enumerator {
    /// Return the first port with the given vendor/product identifiers, if any.
    fn find(
        &mut self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<PortMatch>, Box<dyn std::error::Error + Send + Sync>>;
}
