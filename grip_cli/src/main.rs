mod app;
mod cli;
mod error_fmt;

use clap::Parser;
use crossbeam_channel as xch;
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::app::SimOptions;
use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn file_appender(logging: &grip_config::Logging) -> Option<tracing_appender::rolling::RollingFileAppender> {
    let path = std::path::Path::new(logging.file.as_deref()?);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let name = path.file_name()?;
    let appender = match logging.rotation.as_deref().unwrap_or("never") {
        "daily" => tracing_appender::rolling::daily(dir, name),
        "hourly" => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    };
    Some(appender)
}

/// Console logs go to stderr; stdout belongs to the peer channel.
fn init_tracing(cli: &Cli, logging: Option<&grip_config::Logging>) {
    let console_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level))
    };

    let console_json = cli.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter())
    });
    let console_pretty = (!cli.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter())
    });

    let file_layer = logging.and_then(file_appender).map(|appender| {
        let level = logging
            .and_then(|l| l.level.as_deref())
            .unwrap_or(&cli.log_level);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(EnvFilter::new(level))
    });

    let _ = tracing_subscriber::registry()
        .with(console_json)
        .with(console_pretty)
        .with(file_layer)
        .try_init();
}

/// Ctrl-C feeds the event loop's shutdown channel.
fn install_shutdown() -> Result<xch::Receiver<()>> {
    let (tx, rx) = xch::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .wrap_err("install Ctrl-C handler")?;
    Ok(rx)
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = app::load_config(&cli.config);
    init_tracing(cli, cfg.as_ref().ok().map(|c| &c.logging));
    let cfg = cfg?;

    match &cli.cmd {
        Commands::Run { cycles, no_gauge } => {
            let shutdown = install_shutdown()?;
            let summary = app::run_peer(&cfg, *cycles, !no_gauge, shutdown)?;
            if cycles.is_some() {
                summary.outcome()?;
            }
            Ok(())
        }
        Commands::Simulate {
            peak,
            no_coefficient,
            unplugged,
        } => {
            let shutdown = install_shutdown()?;
            let summary = app::run_simulation(
                &cfg,
                SimOptions {
                    peak: *peak,
                    no_coefficient: *no_coefficient,
                    unplugged: *unplugged,
                },
                shutdown,
            )?;
            summary.outcome()?;
            Ok(())
        }
        Commands::SelfCheck => {
            let report = app::self_check(&cfg)?;
            eprintln!("{report}");
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(err) = run(&cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::debug!(error = ?err, "exiting with error");
        std::process::exit(exit_code_for_error(&err));
    }
}
