//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "grip", version, about = "Grip dynamometer controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/grip_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the host application: JSON commands on stdin, statuses on stdout
    Run {
        /// Exit after this many measurement cycles ended
        #[arg(long, value_name = "N")]
        cycles: Option<u32>,
        /// Hide the text gauge on stderr
        #[arg(long, action = ArgAction::SetTrue)]
        no_gauge: bool,
    },
    /// Run one measurement cycle against the built-in simulated dynamometer
    Simulate {
        /// Peak grip in raw sensor units above the resting reading
        #[arg(long, value_name = "RAW", default_value_t = 3000)]
        peak: u16,
        /// Device that never answers the coefficient query
        #[arg(long, action = ArgAction::SetTrue)]
        no_coefficient: bool,
        /// Device that is never plugged in
        #[arg(long, action = ArgAction::SetTrue)]
        unplugged: bool,
    },
    /// Validate the config and look for the instrument once
    SelfCheck,
}
