//! Command-line interface for hrnotify using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::clock::CalendarDate;
use crate::config::DEFAULT_CONFIG_PATH;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format for journalctl (default).
    #[default]
    Text,
    /// Structured JSON format for log aggregation.
    Json,
}

/// Send the HR notifications due today.
#[derive(Parser, Debug)]
#[command(name = "hrnotify")]
#[command(version)]
#[command(about = "Evaluate HR notification rules and email what is due today")]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Validate configuration and exit.
    #[arg(long = "validate")]
    pub validate: bool,

    /// Evaluate rules as if today were this date (YYYY-MM-DD).
    #[arg(long = "date", value_parser = parse_date)]
    pub date: Option<CalendarDate>,

    /// Log every email instead of sending it.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    /// Log format: text or json.
    #[arg(
        long = "log-format",
        value_enum,
        default_value_t = LogFormat::Text,
        env = "LOG_FORMAT",
        global = true
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Without a subcommand, hrnotify runs the daily rule pass.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one email outside the rule pass.
    Send(SendArgs),
}

/// A single email: subject plus an HTML body file, normalized like rule
/// emails before sending.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Recipient address; repeat for several.
    #[arg(long = "to", required = true)]
    pub to: Vec<String>,

    #[arg(long = "subject")]
    pub subject: String,

    /// File holding the HTML body.
    #[arg(long = "html")]
    pub html: PathBuf,

    /// Sender address; defaults to the configured or stored sender.
    #[arg(long = "from")]
    pub from: Option<String>,
}

fn parse_date(value: &str) -> Result<CalendarDate, String> {
    CalendarDate::parse_iso(value).ok_or_else(|| format!("'{}' is not a YYYY-MM-DD date", value))
}
