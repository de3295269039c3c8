use anyhow::Context;
use clap::Parser;
use log::error;
use report_mailer::{init_logging, run, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _handle = init_logging(cli.log_level.into()).context("Failed to initialize logging")?;
    if let Err(e) = run(cli) {
        error!("{e:?}");
        return Err(e);
    }
    Ok(())
}
