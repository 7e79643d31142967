//! In-process dynamometer for demos and end-to-end tests.
//!
//! The simulator answers the same single-byte commands as the instrument.
//! Responses and sample packets are pushed, tagged with the link id, on the
//! byte channel handed to [`SimulatedDynamometer::new`], exactly where a serial
//! reader thread would push them.

use crate::error::HwError;
use crossbeam_channel as xch;
use grip_traits::{Chunk, Connector, Enumerator, Link, LinkId, PortMatch};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Path reported by the simulated enumerator.
pub const SIM_PATH: &str = "sim://grip0";

const GET_COEFFICIENT: u8 = 0x21;
const SET_COEFFICIENT: u8 = 0x20;
const SAMPLING_OFF: u8 = 0x10;
const SAMPLING_ON: u8 = 0x11;
const DEVICE_OFF: u8 = 0x7A;

/// Shape of one simulated grip, in raw sensor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripProfile {
    /// Reading with nothing on the handle.
    pub baseline: u16,
    /// How long the handle rests before the squeeze starts.
    pub rest_ms: u64,
    pub rise_ms: u64,
    pub hold_ms: u64,
    /// Raw delta above `baseline` at the top of the squeeze.
    pub peak: u16,
    pub period_ms: u64,
}

impl Default for GripProfile {
    fn default() -> Self {
        Self {
            baseline: 3500,
            rest_ms: 1500,
            rise_ms: 600,
            hold_ms: 1500,
            peak: 3000,
            period_ms: 50,
        }
    }
}

impl GripProfile {
    /// Raw reading `t_ms` after sampling was switched on.
    pub fn sample_at(&self, t_ms: u64) -> u16 {
        let delta = if t_ms < self.rest_ms {
            0
        } else if t_ms < self.rest_ms + self.rise_ms {
            let k = t_ms - self.rest_ms;
            u64::from(self.peak) * k / self.rise_ms.max(1)
        } else if t_ms < self.rest_ms + self.rise_ms + self.hold_ms {
            u64::from(self.peak)
        } else {
            0
        };
        let delta = u16::try_from(delta).unwrap_or(u16::MAX);
        self.baseline.saturating_add(delta)
    }
}

/// One 11-byte sample packet with `magnitude` big-endian in bytes 3 and 4.
pub fn encode_frame(magnitude: u16) -> [u8; 11] {
    let [hi, lo] = magnitude.to_be_bytes();
    let mut frame = [0x5A, 0xA5, 0x08, hi, lo, 0, 0, 0, 0, 0, 0];
    frame[10] = frame[..10].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    frame
}

#[derive(Debug)]
struct Shared {
    plugged: AtomicBool,
    open: AtomicBool,
    coefficient: Mutex<Option<u32>>,
    written: Mutex<Vec<u8>>,
}

/// Simulated instrument. Clones share the same device, so one clone can be
/// handed to the controller as the enumerator and another as the connector.
#[derive(Debug, Clone)]
pub struct SimulatedDynamometer {
    shared: Arc<Shared>,
    profile: GripProfile,
    vendor_id: u16,
    product_id: u16,
    bytes: xch::Sender<Chunk>,
}

impl SimulatedDynamometer {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        profile: GripProfile,
        bytes: xch::Sender<Chunk>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                plugged: AtomicBool::new(true),
                open: AtomicBool::new(false),
                coefficient: Mutex::new(Some(10_000)),
                written: Mutex::new(Vec::new()),
            }),
            profile,
            vendor_id,
            product_id,
            bytes,
        }
    }

    /// Coefficient reported in micro-units; `None` makes the device ignore
    /// `GetCoefficient`.
    pub fn with_coefficient(self, micros: Option<u32>) -> Self {
        *self
            .shared
            .coefficient
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = micros;
        self
    }

    pub fn set_plugged(&self, plugged: bool) {
        self.shared.plugged.store(plugged, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Every command byte the device received, across all links.
    pub fn written(&self) -> Vec<u8> {
        self.shared
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Enumerator for SimulatedDynamometer {
    fn find(
        &mut self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<PortMatch>, Box<dyn std::error::Error + Send + Sync>> {
        let matches = self.shared.plugged.load(Ordering::SeqCst)
            && vendor_id == self.vendor_id
            && product_id == self.product_id;
        Ok(matches.then(|| PortMatch {
            path: SIM_PATH.to_string(),
            vendor_id,
            product_id,
        }))
    }
}

impl Connector for SimulatedDynamometer {
    fn open(
        &mut self,
        path: &str,
        baud_rate: u32,
        link: LinkId,
    ) -> Result<Box<dyn Link>, Box<dyn std::error::Error + Send + Sync>> {
        if path != SIM_PATH || !self.shared.plugged.load(Ordering::SeqCst) {
            return Err(HwError::NotFound(path.to_string()).into());
        }
        if self.shared.open.swap(true, Ordering::SeqCst) {
            return Err(HwError::AlreadyOpen(path.to_string()).into());
        }
        tracing::debug!(path, baud_rate, link, "simulated port opened");
        Ok(Box::new(SimLink {
            shared: Arc::clone(&self.shared),
            profile: self.profile,
            link,
            bytes: self.bytes.clone(),
            stream: None,
            closed: false,
        }))
    }
}

struct SimLink {
    shared: Arc<Shared>,
    profile: GripProfile,
    link: LinkId,
    bytes: xch::Sender<Chunk>,
    stream: Option<Stream>,
    closed: bool,
}

impl Link for SimLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.closed {
            return Err(HwError::Closed.into());
        }
        for &b in bytes {
            self.shared
                .written
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(b);
            match b {
                GET_COEFFICIENT => {
                    let coefficient = *self
                        .shared
                        .coefficient
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if let Some(micros) = coefficient {
                        let digits = format!("{:06}", micros % 1_000_000);
                        // Receiver gone means nobody listens; the write itself succeeded.
                        let _ = self.bytes.send(Chunk {
                            link: self.link,
                            bytes: digits.into_bytes(),
                        });
                    }
                }
                SAMPLING_ON => {
                    if self.stream.is_none() {
                        self.stream =
                            Some(Stream::spawn(self.profile, self.link, self.bytes.clone()));
                    }
                }
                SAMPLING_OFF | DEVICE_OFF => self.stream = None,
                SET_COEFFICIENT => {}
                other => return Err(HwError::UnknownCommand(other).into()),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.closed {
            self.closed = true;
            self.stream = None;
            self.shared.open.store(false, Ordering::SeqCst);
            tracing::debug!("simulated port closed");
        }
        Ok(())
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Background packet generator. Stops and joins when dropped.
struct Stream {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Stream {
    fn spawn(profile: GripProfile, link: LinkId, tx: xch::Sender<Chunk>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let period = Duration::from_millis(profile.period_ms.max(1));
        let join_handle = std::thread::Builder::new()
            .name("sim-stream".into())
            .spawn(move || {
                let epoch = Instant::now();
                while !flag.load(Ordering::Relaxed) {
                    let t = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
                    let chunk = Chunk {
                        link,
                        bytes: encode_frame(profile.sample_at(t)).to_vec(),
                    };
                    if tx.send(chunk).is_err() {
                        tracing::debug!("simulated stream consumer disconnected");
                        break;
                    }
                    std::thread::sleep(period);
                }
            })
            .map_err(|e| tracing::warn!(error = %e, "failed to spawn simulated stream"))
            .ok();
        Self {
            shutdown,
            join_handle,
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                tracing::warn!("simulated stream thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_rests_rises_holds_and_releases() {
        let p = GripProfile::default();
        assert_eq!(p.sample_at(0), 3500);
        assert_eq!(p.sample_at(1500), 3500);
        assert_eq!(p.sample_at(1800), 5000);
        assert_eq!(p.sample_at(2500), 6500);
        assert_eq!(p.sample_at(10_000), 3500);
    }

    #[test]
    fn frame_carries_magnitude_big_endian() {
        let f = encode_frame(0x1234);
        assert_eq!(f.len(), 11);
        assert_eq!((f[3], f[4]), (0x12, 0x34));
    }
}
