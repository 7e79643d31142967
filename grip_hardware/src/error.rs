use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("port already open: {0}")]
    AlreadyOpen(String),
    #[error("link closed")]
    Closed,
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("serial: {0}")]
    Serial(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "hardware")]
impl From<serialport::Error> for HwError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => HwError::NotFound(e.description),
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                HwError::NotFound(e.description)
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::ResourceBusy) => {
                HwError::AlreadyOpen(e.description)
            }
            _ if e.description.to_lowercase().contains("busy") => HwError::AlreadyOpen(e.description),
            _ => HwError::Serial(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
