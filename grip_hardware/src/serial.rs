//! USB serial backend built on `serialport`.

use crate::error::HwError;
use crossbeam_channel as xch;
use grip_traits::{Chunk, Connector, Enumerator, Link, LinkId, PortMatch};
use serialport::{DataBits, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Finds the instrument among the OS serial ports by USB identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialEnumerator;

impl Enumerator for SerialEnumerator {
    fn find(
        &mut self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<PortMatch>, Box<dyn std::error::Error + Send + Sync>> {
        let ports = serialport::available_ports().map_err(HwError::from)?;
        let found = ports.into_iter().find_map(|p| match p.port_type {
            SerialPortType::UsbPort(info) if info.vid == vendor_id && info.pid == product_id => {
                Some(PortMatch {
                    path: p.port_name,
                    vendor_id: info.vid,
                    product_id: info.pid,
                })
            }
            _ => None,
        });
        Ok(found)
    }
}

/// Opens 8-N-1 serial links and forwards every received chunk to `bytes`,
/// tagged with the id of the link it was read from.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    bytes: xch::Sender<Chunk>,
    read_timeout: Duration,
}

impl SerialConnector {
    pub fn new(bytes: xch::Sender<Chunk>) -> Self {
        Self {
            bytes,
            read_timeout: Duration::from_millis(100),
        }
    }

    /// Upper bound on how long closing a link waits for the reader thread.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Connector for SerialConnector {
    fn open(
        &mut self,
        path: &str,
        baud_rate: u32,
        link: LinkId,
    ) -> Result<Box<dyn Link>, Box<dyn std::error::Error + Send + Sync>> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(self.read_timeout)
            .open()
            .map_err(HwError::from)?;
        let reader_port = port.try_clone().map_err(HwError::from)?;
        let reader = Reader::spawn(reader_port, link, self.bytes.clone());
        tracing::info!(path, baud_rate, link, "serial port opened");
        Ok(Box::new(SerialLink {
            path: path.to_string(),
            port: Some(port),
            reader: Some(reader),
        }))
    }
}

pub struct SerialLink {
    path: String,
    port: Option<Box<dyn SerialPort>>,
    reader: Option<Reader>,
}

impl Link for SerialLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let port = self.port.as_mut().ok_or(HwError::Closed)?;
        port.write_all(bytes).map_err(HwError::from)?;
        port.flush().map_err(HwError::from)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Reader first so it stops touching the cloned handle.
        self.reader = None;
        if self.port.take().is_some() {
            tracing::info!(path = %self.path, "serial port closed");
        }
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Reader thread owning a cloned port handle. Stops and joins on drop.
struct Reader {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Reader {
    fn spawn(mut port: Box<dyn SerialPort>, link: LinkId, tx: xch::Sender<Chunk>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let join_handle = std::thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || {
                let mut buf = [0u8; 256];
                while !flag.load(Ordering::Relaxed) {
                    match port.read(&mut buf) {
                        Ok(0) => {}
                        Ok(n) => {
                            let chunk = Chunk {
                                link,
                                bytes: buf[..n].to_vec(),
                            };
                            if tx.send(chunk).is_err() {
                                tracing::debug!("serial consumer disconnected, exiting reader");
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "serial read failed, reader stopping");
                            break;
                        }
                    }
                }
                tracing::trace!("serial reader exiting cleanly");
            })
            .map_err(|e| tracing::warn!(error = %e, "failed to spawn serial reader"))
            .ok();
        Self {
            shutdown,
            join_handle,
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Exits within one read timeout.
        if let Some(handle) = self.join_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "serial reader panicked during shutdown");
            }
        }
    }
}
