//! Device state machine: discovery, connect, initialize, baseline, measure,
//! finalize and teardown.
//!
//! The controller performs no blocking waits and owns no thread. The event
//! loop feeds it commands and instrument bytes, calls [`DeviceController::poll`]
//! when [`DeviceController::next_deadline`] passes, and drains the statuses
//! it produced. Every cycle lives in a fresh `ControllerSession`; teardown
//! drops it together with every timer, so nothing from an old cycle can act
//! on a new one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use grip_traits::{Chunk, Clock, Connector, Enumerator, Link, LinkId, PortMatch};
use serde_json::{Value, json};

use crate::baseline::{BaselineDetector, BaselineEvent, BaselineState};
use crate::codec::{self, COEFFICIENT_LEN, Command, SAMPLE_LEN};
use crate::config::ControllerCfg;
use crate::error::{ControllerError, ErrorCode};
use crate::fixed_point::Coefficient;
use crate::framer::FrameAssembler;
use crate::hw_error::map_hw_error;
use crate::measurement::{MeasurementSession, MeasurementSummary, SampleOutcome};
use crate::record::{OutputData, RecordMessage, ResultRecord, ResultStore};
use crate::status::Status;
use crate::timer::{TimerHandle, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Idle,
    Searching,
    Connecting,
    Initializing,
    AwaitingBaseline,
    Measuring,
    Finalizing,
    ErrorTeardown,
}

/// Why a cycle ends. Each cause produces at most one terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownCause {
    /// Outer deadline elapsed.
    Timeout,
    Error(ControllerError),
    /// `measureStop` from the peer.
    Stopped,
    /// `appHide` from the peer.
    AppHidden,
    /// Window elapsed; `measure_finish` was already emitted.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerTimer {
    Deadline,
    Poll,
    Settle,
    Window,
}

impl ControllerTimer {
    /// States in which a firing of this timer is meaningful.
    fn applies_in(self, state: ControllerState) -> bool {
        match self {
            Self::Deadline => !matches!(state, ControllerState::Idle | ControllerState::ErrorTeardown),
            Self::Poll => state == ControllerState::Searching,
            Self::Settle => state == ControllerState::Initializing,
            Self::Window => state == ControllerState::Measuring,
        }
    }
}

/// Everything scoped to one measurement cycle.
#[derive(Debug)]
struct ControllerSession {
    cycle: u64,
    /// Timer generation at cycle start; older handles belong to another cycle.
    first_timer: u64,
    input_data: Value,
    port: Option<PortMatch>,
    coefficient: Option<Coefficient>,
    baseline: Option<u16>,
    detector: Option<BaselineDetector>,
    measurement: Option<MeasurementSession>,
    summary: Option<MeasurementSummary>,
    framer: FrameAssembler,
    messages: Vec<RecordMessage>,
}

impl ControllerSession {
    fn new(cycle: u64, first_timer: u64, input_data: Value) -> Self {
        Self {
            cycle,
            first_timer,
            input_data,
            port: None,
            coefficient: None,
            baseline: None,
            detector: None,
            measurement: None,
            summary: None,
            framer: FrameAssembler::new(COEFFICIENT_LEN),
            messages: Vec::new(),
        }
    }

    fn record(&self, cfg: &ControllerCfg) -> ResultRecord {
        let output_data = match (&self.summary, &self.measurement) {
            (Some(s), _) => OutputData::from_weights(&s.raw, Some(s.max), Some(s.average)),
            (None, Some(m)) => OutputData::from_weights(m.samples(), m.max(), None),
            (None, None) => OutputData::default(),
        };
        ResultRecord {
            hardware: json!({
                "vendorId": cfg.device.vendor_id,
                "productId": cfg.device.product_id,
                "path": self.port.as_ref().map(|p| p.path.clone()),
                "coefficient": self.coefficient.map(|c| c.to_string()),
                "baseline": self.baseline,
            }),
            input_data: self.input_data.clone(),
            output_data,
            messages: self.messages.clone(),
        }
    }
}

pub struct DeviceController<E: Enumerator, C: Connector> {
    cfg: ControllerCfg,
    enumerator: E,
    connector: C,
    store: Box<dyn ResultStore>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    state: ControllerState,
    timers: TimerQueue<ControllerTimer>,
    link: Option<Box<dyn Link>>,
    link_id: LinkId,
    session: Option<ControllerSession>,
    cycles: u64,
    outbox: Vec<Status>,
}

impl<E: Enumerator, C: Connector> DeviceController<E, C> {
    pub fn new(
        cfg: ControllerCfg,
        enumerator: E,
        connector: C,
        store: Box<dyn ResultStore>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            cfg,
            enumerator,
            connector,
            store,
            clock,
            epoch,
            state: ControllerState::Idle,
            timers: TimerQueue::new(),
            link: None,
            link_id: 0,
            session: None,
            cycles: 0,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn config(&self) -> &ControllerCfg {
        &self.cfg
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Id the connector tags the open link's bytes with.
    pub fn current_link(&self) -> Option<LinkId> {
        self.link.as_ref().map(|_| self.link_id)
    }

    /// Id of the live cycle, if one is running.
    pub fn cycle(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.cycle)
    }

    pub fn coefficient(&self) -> Option<Coefficient> {
        self.session.as_ref().and_then(|s| s.coefficient)
    }

    pub fn baseline(&self) -> Option<u16> {
        self.session.as_ref().and_then(|s| s.baseline)
    }

    pub fn baseline_state(&self) -> Option<BaselineState> {
        self.session
            .as_ref()
            .and_then(|s| s.detector.as_ref())
            .map(BaselineDetector::state)
    }

    pub fn enumerator(&self) -> &E {
        &self.enumerator
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// Earliest pending timer on the controller's timeline (ms since creation).
    pub fn next_deadline(&self) -> Option<u64> {
        let own = self.timers.next_deadline();
        let det = self.detector_deadline();
        match (own, det) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left until the next timer, zero if one is already due.
    pub fn time_to_next_deadline(&self) -> Option<Duration> {
        let now = self.now_ms();
        self.next_deadline()
            .map(|d| Duration::from_millis(d.saturating_sub(now)))
    }

    fn detector_deadline(&self) -> Option<u64> {
        if self.state != ControllerState::AwaitingBaseline {
            return None;
        }
        self.session
            .as_ref()
            .and_then(|s| s.detector.as_ref())
            .and_then(BaselineDetector::next_deadline)
    }

    pub fn drain_statuses(&mut self) -> Vec<Status> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, status: Status) {
        tracing::debug!(message = status.message(), "status");
        self.outbox.push(status);
    }

    fn enter(&mut self, next: ControllerState) {
        if self.state != next {
            tracing::info!(from = ?self.state, to = ?next, "transition");
            self.state = next;
        }
    }

    // ── commands ────────────────────────────────────────────────────────────

    /// `measureStart`: begin a cycle with device discovery.
    pub fn measure_start(&mut self, input_data: Value) {
        self.poll();
        if self.link.is_some() {
            tracing::warn!("measureStart while a port is held; releasing the stale handle");
            self.teardown(TeardownCause::Error(ControllerError::PortAlreadyOpen));
            return;
        }
        if self.state != ControllerState::Idle {
            tracing::warn!(state = ?self.state, "measureStart ignored: cycle already running");
            return;
        }
        self.cycles += 1;
        let now = self.now_ms();
        self.session = Some(ControllerSession::new(self.cycles, self.timers.mark(), input_data));
        self.enter(ControllerState::Searching);
        self.timers
            .schedule(ControllerTimer::Deadline, now, self.cfg.timeout_ms);
        self.timers.schedule(ControllerTimer::Poll, now, 0);
        tracing::info!(cycle = self.cycles, timeout_ms = self.cfg.timeout_ms, "measurement cycle started");
        self.poll();
    }

    /// `measureSamplingOn`: restart sampling on the already open port without
    /// repeating discovery or baseline detection.
    pub fn start_measure(&mut self) {
        self.poll();
        let ready = self.link.is_some()
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.coefficient.is_some() && s.baseline.is_some());
        if !ready {
            let err = ControllerError::Plugin(
                "measureSamplingOn needs an open port with a confirmed baseline".into(),
            );
            if self.state == ControllerState::Idle && self.session.is_none() {
                tracing::warn!(error = %err, "measureSamplingOn rejected");
                self.emit(Status::Error {
                    code: err.code(),
                    description: err.to_string(),
                });
            } else {
                self.teardown(TeardownCause::Error(err));
            }
            return;
        }
        if let Err(e) = self.write(Command::SamplingOn) {
            self.teardown(TeardownCause::Error(e));
            return;
        }
        let now = self.now_ms();
        let settings = self.cfg.measure;
        if let Some(s) = self.session.as_mut() {
            s.framer.set_frame_len(SAMPLE_LEN);
            s.summary = None;
            if let (Some(baseline), Some(coefficient)) = (s.baseline, s.coefficient) {
                s.measurement = Some(MeasurementSession::new(baseline, coefficient, settings));
            }
        }
        self.timers.cancel(&ControllerTimer::Window);
        self.timers
            .schedule(ControllerTimer::Deadline, now, self.cfg.timeout_ms);
        self.enter(ControllerState::Measuring);
        self.emit(Status::SamplingOn);
    }

    /// `measureStop`.
    pub fn measure_stop(&mut self) {
        self.poll();
        self.teardown(TeardownCause::Stopped);
    }

    /// `appHide`. Emits `app_hide` even when no cycle is running.
    pub fn app_hide(&mut self) {
        self.poll();
        if self.is_quiescent() {
            self.emit(Status::AppHide);
        } else {
            self.teardown(TeardownCause::AppHidden);
        }
    }

    // ── input ───────────────────────────────────────────────────────────────

    /// A chunk from the byte source. Chunks read from an earlier link are
    /// dropped.
    pub fn on_chunk(&mut self, chunk: &Chunk) {
        if self.current_link() != Some(chunk.link) {
            tracing::debug!(link = chunk.link, len = chunk.bytes.len(), "chunk from a closed link dropped");
            return;
        }
        self.on_bytes(&chunk.bytes);
    }

    /// Bytes read from the currently open link, in arrival order.
    pub fn on_bytes(&mut self, bytes: &[u8]) {
        self.poll();
        if self.link.is_none() {
            tracing::trace!(len = bytes.len(), "bytes without an open port dropped");
            return;
        }
        let Some(cycle) = self.cycle() else {
            return;
        };
        let frames = match self.session.as_mut() {
            Some(s) => s.framer.push(bytes),
            None => return,
        };
        for frame in frames {
            // A frame may end the cycle; the rest belong to no one.
            if self.cycle() != Some(cycle) {
                tracing::debug!("frames after teardown dropped");
                break;
            }
            self.on_frame(&frame);
        }
    }

    fn on_frame(&mut self, frame: &[u8]) {
        let now = self.now_ms();
        match self.state {
            ControllerState::Initializing => self.on_coefficient_frame(frame),
            ControllerState::AwaitingBaseline => match codec::decode_sample(frame) {
                Ok(v) => {
                    tracing::trace!(sample = v, "baseline sample");
                    if let Some(d) = self.session.as_mut().and_then(|s| s.detector.as_mut()) {
                        d.on_sample(v, now);
                    }
                }
                Err(e) => self.teardown(TeardownCause::Error(e.into())),
            },
            ControllerState::Measuring => match codec::decode_sample(frame) {
                Ok(v) => self.on_measure_sample(v, now),
                Err(e) => self.teardown(TeardownCause::Error(e.into())),
            },
            other => tracing::trace!(state = ?other, "frame ignored"),
        }
    }

    fn on_coefficient_frame(&mut self, frame: &[u8]) {
        match codec::decode_coefficient(frame) {
            Ok(c) => {
                tracing::info!(coefficient = %c, "coefficient read");
                if let Some(s) = self.session.as_mut() {
                    s.coefficient = Some(c);
                }
            }
            Err(e) => self.teardown(TeardownCause::Error(e.into())),
        }
    }

    fn on_measure_sample(&mut self, v: u16, now: u64) {
        let outcome = match self.session.as_mut().and_then(|s| s.measurement.as_mut()) {
            Some(m) => m.on_sample(v, now),
            None => return,
        };
        match outcome {
            SampleOutcome::Accepted { weight, started } => {
                if started {
                    self.open_window(now);
                }
                self.emit(Status::MeasureReceived { value: weight });
            }
            SampleOutcome::Discarded { started, .. } => {
                if started {
                    self.open_window(now);
                }
            }
            SampleOutcome::BelowTrigger(w) => tracing::trace!(weight = %w, "below trigger"),
            SampleOutcome::Closed => {}
        }
    }

    fn open_window(&mut self, now: u64) {
        self.timers.cancel(&ControllerTimer::Deadline);
        self.timers
            .schedule(ControllerTimer::Window, now, self.cfg.measure.duration_ms);
    }

    // ── timers ──────────────────────────────────────────────────────────────

    /// Fire every timer that is due, in deadline order.
    pub fn poll(&mut self) {
        let now = self.now_ms();
        loop {
            let own = self.timers.next_deadline().filter(|d| *d <= now);
            let det = self.detector_deadline().filter(|d| *d <= now);
            match (own, det) {
                (None, None) => break,
                (Some(a), Some(b)) if b < a => self.fire_detector(now),
                (Some(_), _) => match self.timers.pop_due(now) {
                    Some(h) => self.on_timer(h),
                    None => break,
                },
                (None, Some(_)) => self.fire_detector(now),
            }
        }
    }

    fn fire_detector(&mut self, now: u64) {
        let event = self
            .session
            .as_mut()
            .and_then(|s| s.detector.as_mut())
            .and_then(|d| d.fire_due(now));
        match event {
            Some(BaselineEvent::Confirmed { baseline }) => self.on_baseline_confirmed(baseline),
            Some(BaselineEvent::Stopped) => self.emit(Status::BaselineStop),
            None => {}
        }
    }

    fn on_timer(&mut self, h: TimerHandle<ControllerTimer>) {
        let ours = self
            .session
            .as_ref()
            .is_some_and(|s| h.armed_since(s.first_timer));
        if !ours || !h.kind.applies_in(self.state) {
            tracing::debug!(timer = ?h.kind, state = ?self.state, "stale timer ignored");
            return;
        }
        tracing::debug!(timer = ?h.kind, at_ms = h.deadline_ms, "timer fired");
        match h.kind {
            ControllerTimer::Deadline => self.teardown(TeardownCause::Timeout),
            ControllerTimer::Poll => self.search(h.deadline_ms),
            ControllerTimer::Settle => self.on_settled(),
            ControllerTimer::Window => self.on_window_elapsed(),
        }
    }

    fn search(&mut self, at: u64) {
        let dev = self.cfg.device;
        match self.enumerator.find(dev.vendor_id, dev.product_id) {
            Ok(Some(found)) => {
                tracing::info!(path = %found.path, "device found");
                self.emit(Status::DeviceFound);
                self.enter(ControllerState::Connecting);
                self.connect(found);
            }
            Ok(None) => {
                tracing::debug!(vendor_id = dev.vendor_id, product_id = dev.product_id, "device not present yet");
                self.timers.schedule(ControllerTimer::Poll, at, dev.poll_ms);
            }
            Err(e) => {
                tracing::warn!(error = %e, "device enumeration failed; retrying");
                self.timers.schedule(ControllerTimer::Poll, at, dev.poll_ms);
            }
        }
    }

    fn connect(&mut self, found: PortMatch) {
        let baud = self.cfg.device.baud_rate;
        self.link_id += 1;
        let link = match self.connector.open(&found.path, baud, self.link_id) {
            Ok(link) => link,
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                tracing::error!(path = %found.path, error = %e, "open failed");
                self.teardown(TeardownCause::Error(err));
                return;
            }
        };
        tracing::info!(path = %found.path, baud, link = self.link_id, "port open");
        self.link = Some(link);
        if let Some(s) = self.session.as_mut() {
            s.port = Some(found);
            s.framer.set_frame_len(COEFFICIENT_LEN);
        }
        self.enter(ControllerState::Initializing);
        for cmd in [Command::SamplingOff, Command::GetCoefficient] {
            if let Err(e) = self.write(cmd) {
                self.teardown(TeardownCause::Error(e));
                return;
            }
        }
        let now = self.now_ms();
        self.timers
            .schedule(ControllerTimer::Settle, now, self.cfg.sampling_delay_ms);
    }

    fn on_settled(&mut self) {
        if self.coefficient().is_none() {
            self.teardown(TeardownCause::Error(ControllerError::CoefficientOrFrame(
                "no coefficient response before sampling delay elapsed".into(),
            )));
            return;
        }
        if let Some(s) = self.session.as_mut() {
            s.framer.set_frame_len(SAMPLE_LEN);
        }
        if let Err(e) = self.write(Command::SamplingOn) {
            self.teardown(TeardownCause::Error(e));
            return;
        }
        let settings = self.cfg.baseline;
        if let Some(s) = self.session.as_mut() {
            s.detector = Some(BaselineDetector::new(settings));
        }
        self.enter(ControllerState::AwaitingBaseline);
    }

    fn on_baseline_confirmed(&mut self, baseline: u16) {
        // The outer deadline stays armed until a grip opens the window.
        let settings = self.cfg.measure;
        if let Some(s) = self.session.as_mut() {
            s.baseline = Some(baseline);
            s.detector = None;
            if let Some(c) = s.coefficient {
                s.measurement = Some(MeasurementSession::new(baseline, c, settings));
            }
        }
        self.enter(ControllerState::Measuring);
        self.emit(Status::BaselineOk);
    }

    fn on_window_elapsed(&mut self) {
        self.enter(ControllerState::Finalizing);
        let closed = self
            .session
            .as_mut()
            .and_then(|s| s.measurement.as_mut())
            .map(MeasurementSession::close);
        match closed {
            Some(Ok(summary)) => {
                tracing::info!(max = %summary.max, avg = %summary.average, n = summary.raw.len(), "measurement finished");
                self.emit(Status::MeasureFinish {
                    raw: summary.raw.clone(),
                    avg: summary.average,
                    max: summary.max,
                });
                if let Some(s) = self.session.as_mut() {
                    s.summary = Some(summary);
                }
                self.teardown(TeardownCause::Finished);
            }
            Some(Err(e)) => self.teardown(TeardownCause::Error(e)),
            None => self.teardown(TeardownCause::Error(ControllerError::NoData)),
        }
    }

    // ── device I/O ──────────────────────────────────────────────────────────

    fn write(&mut self, cmd: Command) -> Result<(), ControllerError> {
        let Some(link) = self.link.as_mut() else {
            return Err(ControllerError::Device("port is not open".into()));
        };
        tracing::debug!(?cmd, "write");
        link.write(&[codec::encode(cmd)])
            .map_err(|e| map_hw_error(e.as_ref()))
    }

    // ── teardown ────────────────────────────────────────────────────────────

    fn is_quiescent(&self) -> bool {
        self.state == ControllerState::Idle && self.link.is_none() && self.session.is_none()
    }

    /// End the current cycle: stop timers, switch the instrument off, release
    /// the port, persist the record and return to `Idle`. Does nothing when
    /// no cycle is running and no port is held.
    pub fn teardown(&mut self, cause: TeardownCause) {
        if self.is_quiescent() {
            tracing::trace!(?cause, "teardown: nothing to do");
            return;
        }
        let was = self.state;
        self.enter(ControllerState::ErrorTeardown);
        self.timers.clear();

        if let Some(mut link) = self.link.take() {
            for cmd in [Command::SamplingOff, Command::DeviceOff] {
                if let Err(e) = link.write(&[codec::encode(cmd)]) {
                    tracing::warn!(?cmd, error = %e, "teardown write failed");
                }
            }
            if let Err(e) = link.close() {
                tracing::warn!(error = %e, "closing port failed");
            }
        }

        let status = match &cause {
            TeardownCause::Timeout => {
                // A deadline hit while still searching means the device never appeared.
                let err = if was == ControllerState::Searching {
                    ControllerError::DeviceNotFound
                } else {
                    ControllerError::OverallTimeout
                };
                tracing::warn!(state = ?was, error = %err, "deadline elapsed");
                self.note(err.code(), err.to_string());
                Some(Status::Timeout)
            }
            TeardownCause::Error(e) => {
                tracing::error!(code = e.code().as_u16(), error = %e, state = ?was, "cycle failed");
                self.note(e.code(), e.to_string());
                Some(Status::Error {
                    code: e.code(),
                    description: e.to_string(),
                })
            }
            TeardownCause::Stopped => Some(Status::MeasureStop),
            TeardownCause::AppHidden => Some(Status::AppHide),
            TeardownCause::Finished => None,
        };

        if let Some(session) = self.session.take() {
            let record = session.record(&self.cfg);
            if let Err(e) = self.store.save(&record) {
                let err = ControllerError::TempFile(e.to_string());
                tracing::error!(code = err.code().as_u16(), error = %err, "result not persisted");
            }
        }

        if let Some(s) = status {
            self.emit(s);
        }
        self.enter(ControllerState::Idle);
        tracing::info!(?cause, "cycle ended");
    }

    fn note(&mut self, code: ErrorCode, message: String) {
        if let Some(s) = self.session.as_mut() {
            s.messages.push(RecordMessage::new(code, message));
        }
    }
}

impl<E: Enumerator, C: Connector> Drop for DeviceController<E, C> {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.write(&[codec::encode(Command::SamplingOff)]);
            let _ = link.write(&[codec::encode(Command::DeviceOff)]);
            let _ = link.close();
        }
    }
}
