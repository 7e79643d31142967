//! Wiring: config mapping, backend selection, peer I/O and the event loop.

use std::io::{BufRead, Write};
use std::sync::Arc;

use crossbeam_channel as xch;
use eyre::{Result, WrapErr};
use grip_core::gateway::{Display, OutboundChannel};
use grip_core::runner::{Inputs, RunOptions, RunSummary};
use grip_core::status::Status;
use grip_core::{
    ControllerCfg, DeviceController, FileResultStore, JobQueue, MessagingGateway, QueueCfg,
    SendPolicy,
};
use grip_hardware::{GripProfile, SimulatedDynamometer};
use grip_traits::{Connector, Enumerator, MonotonicClock};
use serde_json::Value;

/// Peer channel writing one JSON object per line to stdout.
pub struct StdoutChannel;

impl OutboundChannel for StdoutChannel {
    fn send(&self, message: &Value) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, message)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Text rendering of the measurement screen on stderr.
pub struct TextGauge {
    enabled: bool,
    visible: bool,
    gauge: bool,
    ceiling: f64,
}

impl TextGauge {
    pub fn new(enabled: bool, ceiling: f64) -> Self {
        Self {
            enabled,
            visible: true,
            gauge: true,
            ceiling,
        }
    }
}

pub fn render_bar(value: f64, ceiling: f64, width: usize) -> String {
    let ratio = if ceiling > 0.0 {
        (value / ceiling).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (ratio * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

impl Display for TextGauge {
    fn render(&mut self, status: &Status) {
        if !self.enabled || !self.visible {
            return;
        }
        match status {
            Status::MeasureReceived { value } if self.gauge => {
                let v = value.to_f64();
                eprintln!("{} {v:.2}", render_bar(v, self.ceiling, 30));
            }
            Status::MeasureReceived { .. } => {}
            Status::MeasureFinish { avg, max, .. } => {
                eprintln!("max {:.2}  avg {:.2}", max.to_f64(), avg.to_f64());
            }
            Status::Error { code, description } => {
                eprintln!("error {}: {description}", code.as_u16());
            }
            other => eprintln!("{}", other.message()),
        }
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn set_gauge_visible(&mut self, visible: bool) {
        self.gauge = visible;
    }
}

/// Read and validate the TOML config at `path`.
pub fn load_config(path: &std::path::Path) -> Result<grip_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = grip_config::load_toml(&text).wrap_err("parse config TOML")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Stream stdin lines to the event loop. EOF drops the sender.
fn spawn_stdin_reader(tx: xch::Sender<String>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
            tracing::debug!("stdin closed");
        })
        .wrap_err("spawn stdin reader")?;
    Ok(())
}

fn serve<E: Enumerator, C: Connector>(
    cfg: &grip_config::Config,
    enumerator: E,
    connector: C,
    inputs: &Inputs,
    gauge: bool,
    opts: RunOptions,
) -> Result<RunSummary> {
    let controller_cfg = ControllerCfg::from(cfg);
    let store = FileResultStore::new(&cfg.storage.results_dir);
    let mut controller = DeviceController::new(
        controller_cfg,
        enumerator,
        connector,
        Box::new(store),
        Arc::new(MonotonicClock::new()),
    );
    let display = TextGauge::new(gauge, controller_cfg.measure.ceiling.to_f64());
    let mut gateway = MessagingGateway::new(
        display,
        Arc::new(StdoutChannel),
        JobQueue::new(QueueCfg::from(&cfg.outbound)),
        SendPolicy::from(&cfg.outbound),
    )?;
    tracing::info!(
        vendor_id = format_args!("{:#06x}", controller_cfg.device.vendor_id),
        product_id = format_args!("{:#06x}", controller_cfg.device.product_id),
        results_dir = %cfg.storage.results_dir,
        "controller ready"
    );
    let summary = grip_core::runner::run(&mut controller, &mut gateway, inputs, opts)?;
    tracing::info!(
        commands = summary.commands,
        rejected = summary.rejected,
        cycles = summary.terminal,
        "event loop finished"
    );
    Ok(summary)
}

/// Serve the host application over stdin/stdout until stdin closes, the
/// requested number of cycles ended or `shutdown` fires.
pub fn run_peer(
    cfg: &grip_config::Config,
    cycles: Option<u32>,
    gauge: bool,
    shutdown: xch::Receiver<()>,
) -> Result<RunSummary> {
    let (lines_tx, lines_rx) = xch::unbounded();
    let (bytes_tx, bytes_rx) = xch::unbounded();
    spawn_stdin_reader(lines_tx)?;
    let inputs = Inputs {
        lines: lines_rx,
        bytes: bytes_rx,
        shutdown,
    };
    let opts = RunOptions {
        stop_after_terminal: cycles,
        ..RunOptions::default()
    };

    #[cfg(feature = "hardware")]
    let (enumerator, connector) = (
        grip_hardware::SerialEnumerator,
        grip_hardware::SerialConnector::new(bytes_tx),
    );
    #[cfg(not(feature = "hardware"))]
    let (enumerator, connector) = {
        tracing::warn!("built without the hardware feature; serving the simulated dynamometer");
        let sim = SimulatedDynamometer::new(
            cfg.device.vendor_id,
            cfg.device.product_id,
            GripProfile::default(),
            bytes_tx,
        );
        (sim.clone(), sim)
    };
    serve(cfg, enumerator, connector, &inputs, gauge, opts)
}

#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    pub peak: u16,
    pub no_coefficient: bool,
    pub unplugged: bool,
}

/// One scripted measureStart against the simulator; returns when the cycle ended.
pub fn run_simulation(
    cfg: &grip_config::Config,
    sim_opts: SimOptions,
    shutdown: xch::Receiver<()>,
) -> Result<RunSummary> {
    let (lines_tx, lines_rx) = xch::unbounded();
    let (bytes_tx, bytes_rx) = xch::unbounded();
    let profile = GripProfile {
        peak: sim_opts.peak,
        ..GripProfile::default()
    };
    let sim = SimulatedDynamometer::new(cfg.device.vendor_id, cfg.device.product_id, profile, bytes_tx)
        .with_coefficient((!sim_opts.no_coefficient).then_some(10_000));
    sim.set_plugged(!sim_opts.unplugged);

    lines_tx
        .send(r#"{"inputData": {"cmd": "measureStart", "source": "simulate"}}"#.to_string())
        .wrap_err("queue simulated measureStart")?;
    drop(lines_tx);

    let inputs = Inputs {
        lines: lines_rx,
        bytes: bytes_rx,
        shutdown,
    };
    serve(cfg, sim.clone(), sim, &inputs, true, RunOptions::default())
}

/// Look for the instrument once and report what was found.
pub fn self_check(cfg: &grip_config::Config) -> Result<String> {
    let vendor_id = cfg.device.vendor_id;
    let product_id = cfg.device.product_id;

    #[cfg(feature = "hardware")]
    let found = {
        let mut enumerator = grip_hardware::SerialEnumerator;
        enumerator
            .find(vendor_id, product_id)
            .map_err(|e| eyre::eyre!(e))
            .wrap_err("enumerate serial ports")?
    };
    #[cfg(not(feature = "hardware"))]
    let found = {
        let (tx, _rx) = xch::unbounded();
        let mut sim = SimulatedDynamometer::new(vendor_id, product_id, GripProfile::default(), tx);
        sim.find(vendor_id, product_id).map_err(|e| eyre::eyre!(e))?
    };

    let results_dir = std::path::Path::new(&cfg.storage.results_dir);
    std::fs::create_dir_all(results_dir)
        .wrap_err_with(|| format!("create results dir {}", results_dir.display()))?;

    Ok(match found {
        Some(m) => format!(
            "OK: device {:#06x}:{:#06x} at {}",
            m.vendor_id, m.product_id, m.path
        ),
        None => format!("OK: config valid; no device {vendor_id:#06x}:{product_id:#06x} connected"),
    })
}
