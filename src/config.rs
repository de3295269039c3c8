use std::fmt::Debug;

use anyhow::{bail, Context};
use log::debug;
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "smtp.qq.com";
pub const DEFAULT_PORT: u16 = 25;

/// Everything the mailer needs, read once from the environment at startup
#[derive(Debug, Clone)]
pub struct Settings {
    /// `dev` always runs a single batch regardless of the schedule
    pub mode: MailMode,

    /// Cron expression for repeated runs, `None` means run once
    pub cron: Option<String>,

    /// Each receiver gets their own email
    pub receivers: Vec<Receiver>,

    /// Copied on every email
    pub ccs: Vec<Receiver>,

    /// Placed at the start of the subject (`MAIL_USER`)
    pub label: String,

    /// Appended to the end of the subject (`MAIL_SUBJECT`)
    pub subject_suffix: String,

    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailMode {
    Dev,
    #[default]
    Prod,
}

impl From<&str> for MailMode {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("dev") {
            Self::Dev
        } else {
            Self::Prod
        }
    }
}

/// Entry of the `MAIL_TO` and `MAIL_CC` JSON arrays
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Receiver {
    pub email: String,

    #[serde(default)]
    pub local: Option<String>,
}

impl From<&str> for Receiver {
    fn from(email: &str) -> Self {
        Self {
            email: email.to_string(),
            local: None,
        }
    }
}

/// Connection and identity used for every send
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Used as the From mailbox when an email doesn't set one
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: Default::default(),
            password: Default::default(),
            from: Default::default(),
        }
    }
}

impl Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

impl Settings {
    /// Reads the process environment, which is the only source (no `.env` file is loaded)
    pub fn from_env() -> anyhow::Result<Self> {
        debug!("Loading settings from environment");
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings using `lookup` to find the value of each variable
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let receivers = match var("MAIL_TO") {
            Some(json) => parse_receivers("MAIL_TO", &json)?,
            None => bail!("MAIL_TO is not set"),
        };
        let ccs = match var("MAIL_CC") {
            Some(json) => parse_receivers("MAIL_CC", &json)?,
            None => Vec::new(),
        };
        let port = match var("MAIL_PORT") {
            Some(port) => port
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse MAIL_PORT {port:?}"))?,
            None => DEFAULT_PORT,
        };

        let result = Self {
            mode: var("MAIL_MODE")
                .map(|mode| MailMode::from(mode.trim()))
                .unwrap_or_default(),
            cron: var("MAIL_CRON").map(|cron| cron.trim().to_string()),
            receivers,
            ccs,
            label: var("MAIL_USER").unwrap_or_default(),
            subject_suffix: var("MAIL_SUBJECT").unwrap_or_default(),
            smtp: SmtpConfig {
                host: var("MAIL_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port,
                username: var("MAIL_USERNAME").unwrap_or_default(),
                password: var("MAIL_PASSWORD").unwrap_or_default(),
                from: var("MAIL_FROM").unwrap_or_default(),
            },
        };
        debug!("Settings loaded: {result:?}");
        Ok(result)
    }

    /// True when a single batch should be sent instead of following the schedule
    pub fn is_run_once(&self) -> bool {
        self.mode == MailMode::Dev || self.cron.is_none()
    }

    pub fn cc_emails(&self) -> Vec<String> {
        self.ccs.iter().map(|cc| cc.email.clone()).collect()
    }
}

fn parse_receivers(key: &str, json: &str) -> anyhow::Result<Vec<Receiver>> {
    serde_json::from_str(json).with_context(|| format!("Failed to parse {key} from {json:?}"))
}
