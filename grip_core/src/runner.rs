//! Single-threaded event loop around the controller.
//!
//! Waits on inbound peer lines, instrument bytes, finished send attempts, a
//! shutdown signal and the earliest controller or queue deadline, all through
//! one `crossbeam_channel::select!`. Everything the controller does happens on
//! this thread. Sends staged during a turn start at the top of the next one,
//! highest priority first.

use std::time::{Duration, Instant};

use crossbeam_channel::{self as xch, select};
use grip_traits::{Chunk, Connector, Enumerator};

use crate::controller::{ControllerState, DeviceController, TeardownCause};
use crate::error::{CycleFailed, ErrorCode, Result};
use crate::gateway::{Display, InboundCommand, MessagingGateway};
use crate::status::Status;

/// Channels feeding the loop.
pub struct Inputs {
    /// Raw JSON lines from the peer. Disconnecting ends the loop once idle.
    pub lines: xch::Receiver<String>,
    /// Byte chunks read from the instrument, tagged with their link.
    pub bytes: xch::Receiver<Chunk>,
    pub shutdown: xch::Receiver<()>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Return after this many terminal statuses were published.
    pub stop_after_terminal: Option<u32>,
    /// How long to wait for queued sends on exit.
    pub drain_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stop_after_terminal: None,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub commands: u64,
    pub rejected: u64,
    pub chunks: u64,
    pub terminal: u32,
    /// Most recent status that closed a cycle.
    pub last_terminal: Option<Status>,
}

impl RunSummary {
    /// `Err` when the last cycle ended on an error or a timeout.
    pub fn outcome(&self) -> std::result::Result<(), CycleFailed> {
        match &self.last_terminal {
            Some(Status::Error { code, description }) => Err(CycleFailed {
                code: *code,
                description: description.clone(),
            }),
            Some(Status::Timeout) => Err(CycleFailed {
                code: ErrorCode::OverallTimeout,
                description: "measurement timed out".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn earliest(controller: Option<Duration>, queue: Option<Instant>) -> Option<Duration> {
    let queue = queue.map(|at| at.saturating_duration_since(Instant::now()));
    match (controller, queue) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn tally(summary: &mut RunSummary, published: Vec<Status>) {
    for status in published {
        if status.is_terminal() {
            summary.terminal += 1;
            summary.last_terminal = Some(status);
        }
    }
}

pub fn run<E: Enumerator, C: Connector, D: Display>(
    controller: &mut DeviceController<E, C>,
    gateway: &mut MessagingGateway<D>,
    inputs: &Inputs,
    opts: RunOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let mut bytes = inputs.bytes.clone();
    let mut shutdown = inputs.shutdown.clone();
    let mut lines = inputs.lines.clone();
    let attempts = gateway.queue().completions().clone();
    let mut peer_closed = false;
    let done = |s: &RunSummary| opts.stop_after_terminal.is_some_and(|n| s.terminal >= n);

    loop {
        controller.poll();
        tally(&mut summary, gateway.flush(controller)?);
        gateway.queue_mut().poll(Instant::now());
        if done(&summary) {
            tracing::info!(terminal = summary.terminal, "requested number of cycles reached");
            break;
        }
        // A closed peer lets the running cycle finish first.
        if peer_closed && controller.state() == ControllerState::Idle {
            break;
        }

        let wake = earliest(
            controller.time_to_next_deadline(),
            gateway.queue().next_deadline(),
        )
        .map_or_else(xch::never, xch::after);

        select! {
            recv(lines) -> msg => match msg {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => match InboundCommand::parse(line.trim()) {
                    Ok(cmd) => {
                        summary.commands += 1;
                        controller.poll();
                        tally(&mut summary, gateway.flush(controller)?);
                        tally(&mut summary, gateway.dispatch(cmd, controller)?);
                    }
                    Err(e) => {
                        summary.rejected += 1;
                        tracing::warn!(error = %e, "inbound message rejected");
                    }
                },
                Err(_) => {
                    tracing::info!("peer channel closed");
                    peer_closed = true;
                    lines = xch::never();
                }
            },
            recv(bytes) -> msg => match msg {
                Ok(chunk) => {
                    summary.chunks += 1;
                    tracing::trace!(link = chunk.link, len = chunk.bytes.len(), "instrument bytes");
                    controller.on_chunk(&chunk);
                }
                Err(_) => {
                    tracing::debug!("instrument byte source closed");
                    bytes = xch::never();
                }
            },
            recv(attempts) -> msg => {
                if let Ok(done) = msg {
                    gateway.queue_mut().on_attempt_done(done, Instant::now());
                }
            },
            recv(shutdown) -> msg => {
                if msg.is_ok() {
                    tracing::info!("shutdown requested");
                    break;
                }
                shutdown = xch::never();
            },
            recv(wake) -> _ => {},
        }
    }

    controller.teardown(TeardownCause::Stopped);
    tally(&mut summary, gateway.flush(controller)?);
    if !gateway.drain(opts.drain_timeout) {
        tracing::warn!(stats = ?gateway.queue().stats(), "outbound queue not drained on exit");
    }
    Ok(summary)
}
