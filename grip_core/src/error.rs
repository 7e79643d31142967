use std::time::Duration;

use thiserror::Error;

/// Wire decoding failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed sample packet: expected 11 bytes, got {0}")]
    MalformedPacket(usize),
    #[error("malformed coefficient response: {0}")]
    MalformedCoefficient(String),
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),
}

/// Stable numeric codes reported to the peer and written to result records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TempFileError = 1,
    DeviceNotFound = 2,
    GenericDeviceError = 3,
    CoefficientOrFrameError = 4,
    GenericPluginError = 5,
    OverallTimeout = 6,
    NoOrInvalidData = 7,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TempFileError => "TempFileError",
            Self::DeviceNotFound => "DeviceNotFound",
            Self::GenericDeviceError => "GenericDeviceError",
            Self::CoefficientOrFrameError => "CoefficientOrFrameError",
            Self::GenericPluginError => "GenericPluginError",
            Self::OverallTimeout => "OverallTimeout",
            Self::NoOrInvalidData => "NoOrInvalidData",
        }
    }
}

/// Failures that end a measurement cycle. Each one maps to an `ErrorCode`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("could not write result file: {0}")]
    TempFile(String),
    #[error("no dynamometer with the configured vendor/product id was found")]
    DeviceNotFound,
    #[error("device error: {0}")]
    Device(String),
    #[error("serial port already open")]
    PortAlreadyOpen,
    #[error("bad coefficient or frame: {0}")]
    CoefficientOrFrame(String),
    #[error("plugin error: {0}")]
    Plugin(String),
    #[error("overall measurement deadline elapsed")]
    OverallTimeout,
    #[error("no valid measurement data was captured")]
    NoData,
}

impl ControllerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TempFile(_) => ErrorCode::TempFileError,
            Self::DeviceNotFound => ErrorCode::DeviceNotFound,
            Self::Device(_) | Self::PortAlreadyOpen => ErrorCode::GenericDeviceError,
            Self::CoefficientOrFrame(_) => ErrorCode::CoefficientOrFrameError,
            Self::Plugin(_) => ErrorCode::GenericPluginError,
            Self::OverallTimeout => ErrorCode::OverallTimeout,
            Self::NoData => ErrorCode::NoOrInvalidData,
        }
    }
}

impl From<CodecError> for ControllerError {
    fn from(e: CodecError) -> Self {
        Self::CoefficientOrFrame(e.to_string())
    }
}

/// Why a single job attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("no handler registered for job type {0:?}")]
    NoHandler(String),
    #[error("job attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("job queue dropped before the job finished")]
    Dropped,
}

impl JobError {
    /// Permanent failures are never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NoHandler(_) | Self::Dropped)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("a handler is already registered for job type {0:?}")]
    HandlerExists(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("inbound message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("inbound message has no inputData.cmd")]
    MissingCommand,
    #[error("unknown inbound command {0:?}")]
    UnknownCommand(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A cycle that ended without a measurement, as seen by application callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("measurement cycle failed with {} (code {}): {description}", code.name(), code.as_u16())]
pub struct CycleFailed {
    pub code: ErrorCode,
    pub description: String,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
