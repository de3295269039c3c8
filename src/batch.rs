use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use anyhow::{bail, Context};
use chrono::{Days, NaiveDate};
use lettre::Transport;
use log::{debug, error, info, warn};

use crate::{
    config::{Settings, SmtpConfig},
    mail::{send_email, Email},
    utils::make_single_line,
};

pub const DEFAULT_WORKERS: usize = 4;

/// Format used for report file names and the week range in the subject
const REPORT_DATE: &str = "%Y.%-m.%-d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Directory holding the dated report files
    pub report_dir: PathBuf,

    /// Maximum number of emails being sent at the same time
    pub workers: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("."),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Result of sending to one receiver
#[derive(Debug)]
pub struct SendOutcome {
    pub recipient: String,
    pub result: anyhow::Result<()>,
}

impl SendOutcome {
    fn log(&self) {
        match &self.result {
            Ok(()) => info!("Send email {} success!", self.recipient),
            Err(e) => error!(
                "Send email {} failed: {}",
                self.recipient,
                make_single_line(&format!("{e:#}"))
            ),
        }
    }
}

/// Outcomes of one batch run in the same order as the configured receivers
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<SendOutcome>,
}

impl BatchReport {
    pub fn sent(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.sent()
    }
}

/// Name of the report file for `date`, e.g. `2024.3.5`
pub fn report_file_name(date: NaiveDate) -> String {
    date.format(REPORT_DATE).to_string()
}

/// The seven days starting at `date`, e.g. `2024.3.5-2024.3.11`
pub fn week_range(date: NaiveDate) -> String {
    let end = date + Days::new(6);
    format!("{}-{}", report_file_name(date), report_file_name(end))
}

pub fn subject_for(label: &str, date: NaiveDate, suffix: &str) -> String {
    format!("{label} {}{suffix}", week_range(date))
}

pub fn read_report(report_dir: &Path, date: NaiveDate) -> anyhow::Result<String> {
    let path = report_dir.join(report_file_name(date));
    debug!("Reading report from {path:?}");
    fs::read_to_string(&path).with_context(|| format!("Failed to read report file {path:?}"))
}

/// One email per receiver, each sharing the cc list, subject and body
pub fn build_emails(settings: &Settings, content: &str, date: NaiveDate) -> Vec<Email> {
    let subject = subject_for(&settings.label, date, &settings.subject_suffix);
    let cc = settings.cc_emails();
    settings
        .receivers
        .iter()
        .map(|receiver| Email {
            from: None,
            to: vec![receiver.email.clone()],
            cc: cc.clone(),
            bcc: Vec::new(),
            subject: subject.clone(),
            content: content.to_string(),
        })
        .collect()
}

/// Sends the report for `date` to every receiver
///
/// Fails only if the batch can't start (e.g. the report file is missing).
/// Individual send failures are logged and recorded in the returned report.
pub fn run_batch<T>(
    settings: &Settings,
    transport: &T,
    options: &BatchOptions,
    date: NaiveDate,
) -> anyhow::Result<BatchReport>
where
    T: Transport + Sync,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    if settings.receivers.is_empty() {
        warn!("No receivers configured, nothing to send");
        return Ok(BatchReport::default());
    }

    let content = read_report(&options.report_dir, date)?;
    let emails = build_emails(settings, &content, date);
    info!(
        "Sending {} emails for {}",
        emails.len(),
        report_file_name(date)
    );

    let outcomes = send_all(transport, &settings.smtp, &emails, options.workers)?;
    let result = BatchReport { outcomes };
    info!(
        "Batch finished, {} sent and {} failed",
        result.sent(),
        result.failed()
    );
    Ok(result)
}

/// Sends `emails` using at most `workers` threads that share the transport
fn send_all<T>(
    transport: &T,
    config: &SmtpConfig,
    emails: &[Email],
    workers: usize,
) -> anyhow::Result<Vec<SendOutcome>>
where
    T: Transport + Sync,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let workers = workers.clamp(1, emails.len().max(1));
    debug!("Starting {workers} sender threads");
    let next = AtomicUsize::new(0);
    let next = &next;

    let mut indexed = thread::scope(|scope| -> anyhow::Result<Vec<(usize, SendOutcome)>> {
        let handles = (0..workers)
            .map(|i| {
                thread::Builder::new()
                    .name(format!("Sender-{i}"))
                    .spawn_scoped(scope, move || {
                        let mut done = Vec::new();
                        // Each worker claims the next unsent email until none are left
                        loop {
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            let Some(email) = emails.get(index) else {
                                break;
                            };
                            let outcome = SendOutcome {
                                recipient: email.to.join(", "),
                                result: send_email(transport, email, config),
                            };
                            outcome.log();
                            done.push((index, outcome));
                        }
                        done
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to start sender thread")?;

        let mut result = Vec::with_capacity(emails.len());
        for handle in handles {
            match handle.join() {
                Ok(mut done) => result.append(&mut done),
                Err(_) => bail!("Sender thread panicked"),
            }
        }
        Ok(result)
    })?;

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, outcome)| outcome).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{MailMode, Receiver},
        mail::testing::RecordingTransport,
    };
    use rstest::rstest;
    use tempfile::{tempdir, TempDir};

    /// Writes `contents` as the report file named `file_name`
    fn write_report(dir: &TempDir, file_name: &str, contents: &str) {
        fs::write(dir.path().join(file_name), contents).unwrap();
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    fn settings(receivers: &[&str]) -> Settings {
        Settings {
            mode: MailMode::Prod,
            cron: None,
            receivers: receivers.iter().map(|r| Receiver::from(*r)).collect(),
            ccs: vec!["boss@x.com".into()],
            label: "Alice".into(),
            subject_suffix: " weekly".into(),
            smtp: SmtpConfig {
                from: "alice@x.com".into(),
                ..Default::default()
            },
        }
    }

    fn options(dir: &TempDir, workers: usize) -> BatchOptions {
        BatchOptions {
            report_dir: dir.path().to_path_buf(),
            workers,
        }
    }

    #[rstest]
    #[case(2024, 3, 5, "2024.3.5")]
    #[case(2024, 12, 25, "2024.12.25")]
    #[case(2025, 1, 10, "2025.1.10")]
    fn file_name_not_padded(
        #[case] year: i32,
        #[case] month: u32,
        #[case] day: u32,
        #[case] expected: &str,
    ) {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        assert_eq!(report_file_name(date), expected);
    }

    #[rstest]
    #[case(2024, 3, 5, "2024.3.5-2024.3.11")]
    #[case(2024, 2, 26, "2024.2.26-2024.3.3")]
    #[case(2024, 12, 28, "2024.12.28-2025.1.3")]
    fn week_spans_seven_days(
        #[case] year: i32,
        #[case] month: u32,
        #[case] day: u32,
        #[case] expected: &str,
    ) {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        assert_eq!(week_range(date), expected);
    }

    #[test]
    fn subject_has_label_week_and_suffix() {
        assert_eq!(
            subject_for("Alice", date(), "周报"),
            "Alice 2024.3.5-2024.3.11周报"
        );
    }

    #[test]
    fn one_email_per_receiver() {
        // Arrange
        let settings = settings(&["a@x.com", "b@x.com"]);

        // Act
        let actual = build_emails(&settings, "report body", date());

        // Assert
        assert_eq!(actual.len(), 2);
        for (email, to) in actual.iter().zip(["a@x.com", "b@x.com"]) {
            assert_eq!(email.to, vec![to.to_string()]);
            assert_eq!(email.cc, vec!["boss@x.com".to_string()]);
            assert!(email.bcc.is_empty());
            assert_eq!(email.from, None);
            assert_eq!(email.subject, "Alice 2024.3.5-2024.3.11 weekly");
            assert_eq!(email.content, "report body");
        }
    }

    #[rstest]
    #[case::single_worker(1)]
    #[case::some_workers(2)]
    #[case::more_workers_than_emails(16)]
    #[case::zero_treated_as_one(0)]
    fn failing_send_does_not_stop_batch(#[case] workers: usize) {
        // Arrange
        let dir = tempdir().unwrap();
        write_report(&dir, "2024.3.5", "numbers went up");
        let settings = settings(&["a@x.com", "broken@x.com", "c@x.com"]);
        let transport = RecordingTransport::failing_for(&["broken@x.com"]);

        // Act
        let actual = run_batch(&settings, &transport, &options(&dir, workers), date()).unwrap();

        // Assert
        assert_eq!(transport.attempts().len(), 3);
        assert_eq!(actual.outcomes.len(), 3);
        assert_eq!(actual.sent(), 2);
        assert_eq!(actual.failed(), 1);
        let recipients: Vec<&str> = actual
            .outcomes
            .iter()
            .map(|o| o.recipient.as_str())
            .collect();
        assert_eq!(recipients, vec!["a@x.com", "broken@x.com", "c@x.com"]);
        assert!(actual.outcomes[1].result.is_err());
    }

    #[test]
    fn report_content_is_body() {
        let dir = tempdir().unwrap();
        write_report(&dir, "2024.3.5", "numbers went up");
        let settings = settings(&["a@x.com"]);
        let transport = RecordingTransport::new();

        run_batch(&settings, &transport, &options(&dir, 2), date()).unwrap();

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 1);
        let payload = String::from_utf8(attempts[0].1.clone()).unwrap();
        assert!(payload.contains("\r\nSubject: Alice 2024.3.5-2024.3.11 weekly\r\n"));
        assert!(payload.ends_with("\r\n\r\nnumbers went up\r\n\r\n"));
    }

    #[test]
    fn invalid_receiver_only_fails_itself() {
        let dir = tempdir().unwrap();
        write_report(&dir, "2024.3.5", "body");
        let settings = settings(&["a@x.com", "not-an-email"]);
        let transport = RecordingTransport::new();

        let actual = run_batch(&settings, &transport, &options(&dir, 2), date()).unwrap();

        assert_eq!(actual.sent(), 1);
        assert_eq!(actual.failed(), 1);
        assert_eq!(transport.attempts().len(), 1);
    }

    #[test]
    fn missing_report_aborts_batch() {
        let dir = tempdir().unwrap();
        let settings = settings(&["a@x.com"]);
        let transport = RecordingTransport::new();

        let actual = run_batch(&settings, &transport, &options(&dir, 2), date());

        assert!(actual.is_err());
        assert!(transport.attempts().is_empty());
    }

    #[test]
    fn no_receivers_skips_report() {
        let settings = settings(&[]);
        let transport = RecordingTransport::new();
        let options = BatchOptions {
            report_dir: PathBuf::from("/does/not/exist"),
            workers: 2,
        };

        let actual = run_batch(&settings, &transport, &options, date()).unwrap();

        assert!(actual.outcomes.is_empty());
        assert!(transport.attempts().is_empty());
    }
}
