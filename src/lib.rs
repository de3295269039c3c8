mod batch;
mod cli;
mod config;
mod logging;
mod mail;
mod schedule;
mod utils;

pub use batch::{run_batch, BatchOptions, BatchReport, SendOutcome};
pub use cli::{Cli, LogLevel};
pub use config::{MailMode, Receiver, Settings, SmtpConfig};
pub use logging::init_logging;
pub use mail::{send_email, smtp_transport, Email};

use anyhow::Context;
use chrono::Local;
use log::{info, warn};

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("Failed to load settings from environment")?;
    let options = cli.batch_options();

    if cli.once || settings.is_run_once() {
        let report = send_once(&settings, &options)?;
        if report.failed() > 0 {
            warn!("{} of {} emails failed", report.failed(), report.outcomes.len());
        }
        info!("Completed");
        Ok(())
    } else {
        schedule::run_scheduled(settings, options)
    }
}

/// Sends today's report to every receiver over SMTP
pub fn send_once(settings: &Settings, options: &BatchOptions) -> anyhow::Result<BatchReport> {
    let transport = smtp_transport(&settings.smtp)?;
    let today = Local::now().date_naive();
    run_batch(settings, &transport, options, today)
}
