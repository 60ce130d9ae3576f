//! Command-line argument parsing.

use clap::Parser;
use otalink_common::LogFormat;

use crate::config::Mechanism;

/// otalink agent - over-the-air update daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "otalink-agent")]
#[command(about = "otalink agent - over-the-air update daemon")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (defaults to /etc/otalink/agent.yaml if present)
    #[arg(short, long, env = "OTALINK_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Update mechanism of this device, overrides the configuration file
    #[arg(long, value_enum)]
    pub mechanism: Option<Mechanism>,

    /// Release service base URL, overrides the configuration file
    #[arg(long, env = "OTALINK_SERVER_URL")]
    pub server_url: Option<String>,
}
