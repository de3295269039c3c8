use anyhow::Context;
use lettre::{
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
    },
    SmtpTransport, Transport,
};
use log::debug;

use crate::{config::SmtpConfig, mail::Email};

/// Creates the SMTP transport for `host:port` using PLAIN authentication
///
/// STARTTLS is used when the server offers it, otherwise the session stays in
/// plain text. No connection is made until the first email is sent.
pub fn smtp_transport(config: &SmtpConfig) -> anyhow::Result<SmtpTransport> {
    debug!("Creating SMTP transport for {}:{}", config.host, config.port);
    let tls = TlsParameters::new(config.host.clone())
        .with_context(|| format!("Failed to create TLS parameters for {:?}", config.host))?;
    let result = SmtpTransport::builder_dangerous(config.host.as_str())
        .port(config.port)
        .tls(Tls::Opportunistic(tls))
        .credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ))
        .authentication(vec![Mechanism::Plain])
        .build();
    Ok(result)
}

/// Formats `email` and hands it to `transport`
///
/// Nothing is sent if any address fails to parse. Bcc receivers get the email
/// through the envelope only, the sent document has no `Bcc:` header.
pub fn send_email<T>(transport: &T, email: &Email, config: &SmtpConfig) -> anyhow::Result<()>
where
    T: Transport,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let envelope = email.envelope(config)?;
    let payload = email.transmitted(config)?;
    debug!(
        "Sending {} bytes from {:?} to {:?}",
        payload.len(),
        envelope.from(),
        envelope.to()
    );
    transport
        .send_raw(&envelope, &payload)
        .context("SMTP server rejected the email")?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{io, sync::Mutex};

    use lettre::{address::Envelope, Transport};

    /// Keeps every attempted email in memory, failing for chosen recipients
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        failing: Vec<String>,
        attempts: Mutex<Vec<(Envelope, Vec<u8>)>>,
    }

    impl RecordingTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn failing_for(addresses: &[&str]) -> Self {
            Self {
                failing: addresses.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }
        }

        pub(crate) fn attempts(&self) -> Vec<(Envelope, Vec<u8>)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        type Ok = ();
        type Error = io::Error;

        fn send_raw(&self, envelope: &Envelope, email: &[u8]) -> Result<(), io::Error> {
            self.attempts
                .lock()
                .unwrap()
                .push((envelope.clone(), email.to_vec()));
            let rejected = envelope
                .to()
                .iter()
                .any(|address| self.failing.contains(&address.to_string()));
            if rejected {
                Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "535 Error: authentication failed\nTry again later",
                ))
            } else {
                Ok(())
            }
        }
    }
}
