use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::FixedOffset;
use log::{debug, error, info};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{batch::BatchOptions, config::Settings, send_once};

/// Schedules are evaluated in Asia/Shanghai time, which has no daylight saving
const SCHEDULE_UTC_OFFSET_SECS: i32 = 8 * 60 * 60;

pub fn schedule_timezone() -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(SCHEDULE_UTC_OFFSET_SECS).context("Invalid schedule timezone offset")
}

/// Adds a seconds field to standard five field expressions
///
/// Six field expressions (with seconds) and `@` shortcuts such as `@daily` are
/// returned with their whitespace collapsed. Anything else, including seven
/// field expressions with a year, is rejected.
///
/// Day-of-week numbering follows the scheduler's parser. When both day-of-month
/// and day-of-week are restricted a day has to match both of them, not either.
pub fn normalize_cron(expression: &str) -> anyhow::Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [shortcut] if shortcut.starts_with('@') => Ok(shortcut.to_string()),
        fields if fields.len() == 5 => Ok(format!("0 {}", fields.join(" "))),
        fields if fields.len() == 6 => Ok(fields.join(" ")),
        fields => bail!(
            "Cron expression {expression:?} has {} fields, expected 5 or 6 (with seconds)",
            fields.len()
        ),
    }
}

/// Runs a batch every time `settings.cron` triggers, blocks until Ctrl-C
pub fn run_scheduled(settings: Settings, options: BatchOptions) -> anyhow::Result<()> {
    let Some(expression) = settings.cron.as_deref() else {
        bail!("No cron expression configured");
    };
    let expression = normalize_cron(expression)?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(schedule_batches(
        Arc::new(settings),
        Arc::new(options),
        expression,
    ))
}

/// Job sending one batch per trigger of `expression` in the schedule timezone
fn batch_job(
    expression: &str,
    settings: Arc<Settings>,
    options: Arc<BatchOptions>,
) -> anyhow::Result<Job> {
    Job::new_async_tz(expression, schedule_timezone()?, move |_uuid, _l| {
        let settings = Arc::clone(&settings);
        let options = Arc::clone(&options);
        Box::pin(async move {
            debug!("Schedule triggered");
            // SMTP and file access are blocking so keep them off the scheduler threads
            match tokio::task::spawn_blocking(move || send_once(&settings, &options)).await {
                Ok(Ok(_)) => (),
                Ok(Err(e)) => error!("Scheduled batch failed: {e:?}"),
                Err(e) => error!("Scheduled batch did not complete: {e}"),
            }
        })
    })
    .with_context(|| format!("Failed to create job for cron expression {expression:?}"))
}

async fn schedule_batches(
    settings: Arc<Settings>,
    options: Arc<BatchOptions>,
    expression: String,
) -> anyhow::Result<()> {
    let mut scheduler = JobScheduler::new()
        .await
        .context("Failed to create job scheduler")?;

    let job = batch_job(&expression, settings, options)?;

    scheduler
        .add(job)
        .await
        .context("Failed to add job to scheduler")?;
    scheduler
        .start()
        .await
        .context("Failed to start scheduler")?;
    info!("Batches scheduled with {expression:?} (UTC+08:00). Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping scheduler");
    scheduler
        .shutdown()
        .await
        .context("Failed to shut down scheduler")?;
    Ok(())
}
