// Copied and edited based on https://github.com/estk/log4rs/pull/295

use anyhow::Context;
use log::LevelFilter;
use log4rs::Handle;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

const LOG_FILE_PATH: &str = "log/report_mailer.log";
const LOG_ARCHIVE_PATTERN: &str = "log/report_mailer_{}.log";

/// Logs to stderr at `level` and to a rolling file in `log/`
///
/// The file gets everything at `level` as well, including the outcome of every send.
pub fn init_logging(level: LevelFilter) -> anyhow::Result<Handle> {
    let config = build_config(level, LOG_FILE_PATH, LOG_ARCHIVE_PATTERN)?;

    // Keep the handle to change log levels at runtime
    let handle = log4rs::init_config(config).context("Failed to init_config")?;

    Ok(handle)
}

fn build_config(
    level: LevelFilter,
    file_path: &str,
    archive_pattern: &str,
) -> anyhow::Result<Config> {
    // Pattern: https://docs.rs/log4rs/*/log4rs/append/rolling_file/policy/compound/roll/fixed_window/struct.FixedWindowRollerBuilder.html#method.build

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S)} {h({l})} [{T}] {m}{n}",
        )))
        .build();

    let trigger = SizeTrigger::new(2_097_152); // 2mb (2 * 1024 * 1024)
    let roller = FixedWindowRoller::builder()
        .build(archive_pattern, 10) // Max 10 archive files
        .context("Failed to create FixedWindowRoller")?;
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let log_file = RollingFileAppender::builder()
        // Pattern: https://docs.rs/log4rs/*/log4rs/encode/pattern/index.html
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} [{T}] - {m}\n",
        )))
        .build(file_path, Box::new(policy))
        .with_context(|| format!("Failed to create log file at {file_path:?}"))?;

    let config = Config::builder()
        .appender(Appender::builder().build("log_file", Box::new(log_file)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("stderr", Box::new(stderr)),
        )
        .build(
            Root::builder()
                .appender("log_file")
                .appender("stderr")
                .build(level),
        )
        .context("Failed to configure logging")?;
    Ok(config)
}
