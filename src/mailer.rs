use std::time::Duration;

use anyhow::{Context, Result, bail};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, warn};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery seam for the run report.
pub trait Mailer {
    fn send_html(&self, from: &str, to: &[String], subject: &str, html: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
}

impl SmtpMailer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let tls = TlsParameters::new(self.host.clone())
            .with_context(|| format!("failed to prepare TLS for {}", self.host))?;
        Ok(SmtpTransport::builder_dangerous(self.host.as_str())
            .port(self.port)
            .tls(Tls::Opportunistic(tls))
            .timeout(Some(SMTP_TIMEOUT))
            .build())
    }
}

impl Mailer for SmtpMailer {
    fn send_html(&self, from: &str, to: &[String], subject: &str, html: &str) -> Result<()> {
        let message = build_message(from, to, subject, html)?;
        self.transport()?
            .send(&message)
            .with_context(|| format!("SMTP delivery via {}:{} failed", self.host, self.port))?;
        info!(recipients = to.len(), host = %self.host, "report email sent");
        Ok(())
    }
}

/// Unparseable recipients are dropped with a warning; the message only fails
/// when none remain.
pub fn build_message(from: &str, to: &[String], subject: &str, html: &str) -> Result<Message> {
    if to.is_empty() {
        bail!("no recipients configured");
    }

    let sender: Mailbox = from
        .parse()
        .with_context(|| format!("invalid sender address: {from}"))?;
    let mut builder = Message::builder().from(sender).subject(subject);
    let mut accepted = 0;
    for address in to {
        match address.parse::<Mailbox>() {
            Ok(mailbox) => {
                builder = builder.to(mailbox);
                accepted += 1;
            }
            Err(err) => warn!(address = %address, error = %err, "skipping invalid recipient"),
        }
    }
    if accepted == 0 {
        bail!("no valid recipients among {} configured", to.len());
    }

    builder
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())
        .context("failed to assemble report email")
}
