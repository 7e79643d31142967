//! Test doubles for the controller's collaborator seams.
//!
//! Fakes share their recorded state through `Rc<RefCell<..>>` (or
//! `Arc<Mutex<..>>` where the seam crosses threads) so a test can keep a
//! handle after moving the fake into the controller.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use grip_traits::{Connector, Enumerator, Link, LinkId, PortMatch};
use serde_json::Value;

use crate::gateway::{Display, OutboundChannel};
use crate::record::{ResultRecord, ResultStore};
use crate::status::Status;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything the controller did to the (fake) serial port.
#[derive(Debug, Default)]
pub struct WireLog {
    pub opened: Vec<(String, u32)>,
    pub written: Vec<u8>,
    pub closes: u32,
    /// Next `open` fails with this message.
    pub fail_open: Option<String>,
    /// Writes fail while set.
    pub fail_writes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    log: Rc<RefCell<WireLog>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Rc<RefCell<WireLog>> {
        Rc::clone(&self.log)
    }
}

impl Connector for FakeConnector {
    fn open(&mut self, path: &str, baud_rate: u32, _link: LinkId) -> Result<Box<dyn Link>, BoxError> {
        let mut log = self.log.borrow_mut();
        if let Some(msg) = log.fail_open.take() {
            return Err(Box::new(std::io::Error::other(msg)));
        }
        log.opened.push((path.to_string(), baud_rate));
        Ok(Box::new(FakeLink {
            log: Rc::clone(&self.log),
        }))
    }
}

pub struct FakeLink {
    log: Rc<RefCell<WireLog>>,
}

impl Link for FakeLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        let mut log = self.log.borrow_mut();
        if let Some(msg) = &log.fail_writes {
            return Err(Box::new(std::io::Error::other(msg.clone())));
        }
        log.written.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        self.log.borrow_mut().closes += 1;
        Ok(())
    }
}

/// Answers `find` from a script, then from a fixed fallback.
#[derive(Debug, Clone, Default)]
pub struct FakeEnumerator {
    script: Rc<RefCell<VecDeque<Result<Option<PortMatch>, String>>>>,
    fallback: Option<PortMatch>,
    calls: Rc<RefCell<u32>>,
}

impl FakeEnumerator {
    /// Always finds a device at `path`.
    pub fn present(path: &str, vendor_id: u16, product_id: u16) -> Self {
        Self {
            fallback: Some(PortMatch {
                path: path.to_string(),
                vendor_id,
                product_id,
            }),
            ..Self::default()
        }
    }

    /// Never finds anything.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Queue one answer ahead of the fallback.
    pub fn then(self, answer: Result<Option<PortMatch>, String>) -> Self {
        self.script.borrow_mut().push_back(answer);
        self
    }

    pub fn calls(&self) -> Rc<RefCell<u32>> {
        Rc::clone(&self.calls)
    }
}

impl Enumerator for FakeEnumerator {
    fn find(&mut self, vendor_id: u16, product_id: u16) -> Result<Option<PortMatch>, BoxError> {
        *self.calls.borrow_mut() += 1;
        let next = self.script.borrow_mut().pop_front();
        match next {
            Some(Ok(found)) => Ok(found),
            Some(Err(msg)) => Err(Box::new(std::io::Error::other(msg))),
            None => Ok(self
                .fallback
                .clone()
                .filter(|p| p.vendor_id == vendor_id && p.product_id == product_id)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    records: Rc<RefCell<Vec<ResultRecord>>>,
    fail: Option<String>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every save fails with `msg`.
    pub fn failing(msg: &str) -> Self {
        Self {
            fail: Some(msg.to_string()),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Rc<RefCell<Vec<ResultRecord>>> {
        Rc::clone(&self.records)
    }
}

impl ResultStore for MemoryResultStore {
    fn save(&mut self, record: &ResultRecord) -> Result<(), BoxError> {
        if let Some(msg) = &self.fail {
            return Err(Box::new(std::io::Error::other(msg.clone())));
        }
        self.records.borrow_mut().push(record.clone());
        Ok(())
    }
}

/// Display that remembers what it was asked to show.
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    pub rendered: Rc<RefCell<Vec<String>>>,
    pub visible: Rc<RefCell<Option<bool>>>,
    pub gauge_visible: Rc<RefCell<Option<bool>>>,
}

impl Display for RecordingDisplay {
    fn render(&mut self, status: &Status) {
        self.rendered.borrow_mut().push(status.message().to_string());
    }

    fn set_visible(&mut self, visible: bool) {
        *self.visible.borrow_mut() = Some(visible);
    }

    fn set_gauge_visible(&mut self, visible: bool) {
        *self.gauge_visible.borrow_mut() = Some(visible);
    }
}

/// Outbound channel collecting messages in memory. Optionally fails the
/// first `fail_first` sends or takes `latency` per send.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    sent: Arc<Mutex<Vec<Value>>>,
    failures_left: Arc<Mutex<u32>>,
    latency: Duration,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_left: Arc::new(Mutex::new(n)),
            ..Self::default()
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        Self { latency, ..self }
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `message` field of every delivered message, in order.
    pub fn messages(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

impl OutboundChannel for MemoryChannel {
    fn send(&self, message: &Value) -> Result<(), BoxError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let mut left = self
            .failures_left
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *left > 0 {
            *left -= 1;
            return Err(Box::new(std::io::Error::other("peer unavailable")));
        }
        drop(left);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}
