use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use lettre::{address::Envelope, message::Mailbox, Address};

use crate::config::SmtpConfig;

const CRLF: &str = "\r\n";

/// RFC 822 date with a two digit year, e.g. `19 Oct 26 08:39 UTC`
const RFC822_DATE: &str = "%d %b %y %H:%M UTC";

/// A plain text email, addresses are only validated when it is formatted or sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Email {
    /// Falls back to the configured default when `None` or empty
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub content: String,
}

impl Email {
    /// Resolves the From mailbox, using the configured default if needed
    pub fn from_mailbox(&self, config: &SmtpConfig) -> anyhow::Result<Mailbox> {
        let from = match self.from.as_deref().map(str::trim) {
            Some(from) if !from.is_empty() => from,
            _ => config.from.trim(),
        };
        if from.is_empty() {
            bail!("Email has no from address and no default from address is configured");
        }
        parse_mailbox(from)
    }

    /// Serializes the whole document (headers and body) dated now
    pub fn formatted(&self, config: &SmtpConfig) -> anyhow::Result<Vec<u8>> {
        self.formatted_at(config, Utc::now())
    }

    /// Serializes the whole document with `date` in the Date header
    ///
    /// Every address is validated before anything is written so a bad address
    /// never produces partial output.
    pub fn formatted_at(
        &self,
        config: &SmtpConfig,
        date: DateTime<Utc>,
    ) -> anyhow::Result<Vec<u8>> {
        self.render(config, date, Headers::WithBcc)
    }

    /// The document as delivered over SMTP, without the `Bcc:` header
    ///
    /// Bcc receivers are only listed in the envelope.
    pub fn transmitted(&self, config: &SmtpConfig) -> anyhow::Result<Vec<u8>> {
        self.transmitted_at(config, Utc::now())
    }

    pub(crate) fn transmitted_at(
        &self,
        config: &SmtpConfig,
        date: DateTime<Utc>,
    ) -> anyhow::Result<Vec<u8>> {
        self.render(config, date, Headers::WithoutBcc)
    }

    fn render(
        &self,
        config: &SmtpConfig,
        date: DateTime<Utc>,
        headers: Headers,
    ) -> anyhow::Result<Vec<u8>> {
        let from = self.from_mailbox(config)?;
        let to = parse_mailboxes(&self.to)?;
        let cc = parse_mailboxes(&self.cc)?;
        let bcc = parse_mailboxes(&self.bcc)?;

        let mut buf = String::with_capacity(self.content.len() + 256);
        write_header(&mut buf, "From", &from.to_string());
        write_address_header(&mut buf, "To", &to);
        write_address_header(&mut buf, "Cc", &cc);
        if headers == Headers::WithBcc {
            write_address_header(&mut buf, "Bcc", &bcc);
        }
        write_header(&mut buf, "Date", &date.format(RFC822_DATE).to_string());
        // Not encoded, non-ASCII subjects go out as raw UTF-8. Line breaks are not
        // stripped either, so a subject containing CR or LF adds header lines.
        write_header(&mut buf, "Subject", &self.subject);
        buf.push_str(CRLF);
        buf.push_str(&self.content);
        buf.push_str(CRLF);
        buf.push_str(CRLF);
        Ok(buf.into_bytes())
    }

    /// SMTP envelope: the resolved sender and every to, cc and bcc address once
    pub fn envelope(&self, config: &SmtpConfig) -> anyhow::Result<Envelope> {
        let from = self.from_mailbox(config)?;
        let mut recipients: Vec<Address> = Vec::new();
        for address in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            let address = parse_mailbox(address)?.email;
            if !recipients.contains(&address) {
                recipients.push(address);
            }
        }
        Envelope::new(Some(from.email), recipients).context("Failed to build SMTP envelope")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Headers {
    WithBcc,
    WithoutBcc,
}

fn parse_mailbox(address: &str) -> anyhow::Result<Mailbox> {
    address
        .parse()
        .with_context(|| format!("Failed to parse email address {address:?}"))
}

fn parse_mailboxes(addresses: &[String]) -> anyhow::Result<Vec<Mailbox>> {
    addresses.iter().map(|address| parse_mailbox(address)).collect()
}

fn write_header(buf: &mut String, name: &str, value: &str) {
    buf.push_str(name);
    buf.push_str(": ");
    buf.push_str(value);
    buf.push_str(CRLF);
}

/// Skipped entirely when there are no mailboxes
fn write_address_header(buf: &mut String, name: &str, mailboxes: &[Mailbox]) {
    if mailboxes.is_empty() {
        return;
    }
    let value = mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    write_header(buf, name, &value);
}
