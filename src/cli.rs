use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::batch::{BatchOptions, DEFAULT_WORKERS};

#[derive(Parser, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Emails the report file for today to every receiver in MAIL_TO, \
    once or on the MAIL_CRON schedule."
)]
pub struct Cli {
    /// Directory containing the report files
    ///
    /// Report files are named by date, e.g. `2024.3.5`
    #[arg(long, short, value_name = "PATH", default_value = ".")]
    pub report_dir: PathBuf,

    /// Maximum number of emails sent at the same time
    #[arg(long, short, value_name = "N", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Send a single batch now even if MAIL_CRON is set
    #[arg(long)]
    pub once: bool,

    /// Set logging level to use
    #[arg(long, short, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

impl Cli {
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            report_dir: self.report_dir.clone(),
            workers: self.workers,
        }
    }
}

/// Exists to provide better help messages variants copied from LevelFilter as
/// that's the type that is actually needed
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum LogLevel {
    /// Nothing emitted in this mode
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}
