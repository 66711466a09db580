//! Transcript delivery.
//!
//! [`TranscriptDispatcher`] turns a formatted transcript into a mail and
//! hands it to a [`MailSender`] on a detached task. The chat session never
//! waits for the outcome; failures are only logged.

use std::sync::Arc;

use async_trait::async_trait;
use helpline_shared::constants::TRANSCRIPT_SUBJECT;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::MailError;

const DEFAULT_SENDER: &str = "no-reply@localhost";

/// One outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    #[serde(rename = "text")]
    pub body: String,
}

/// Capability to send an email.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Sends mail through an HTTP mail relay: the message is POSTed as JSON,
/// authenticated with the mail account credentials.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    user: Option<String>,
    pass: Option<String>,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, user: Option<String>, pass: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            user,
            pass,
        }
    }
}

#[async_trait]
impl MailSender for HttpMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        let mut request = self.client.post(&self.endpoint).json(&message);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.pass.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Sends mail over SMTP (implicit TLS) with the mail account credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(host: &str, user: String, pass: String) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
            .credentials(Credentials::new(user, pass))
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        let email = lettre::Message::builder()
            .from(message.from.parse::<Mailbox>()?)
            .to(message.to.parse::<Mailbox>()?)
            .subject(message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body)?;

        self.transport.send(email).await?;
        Ok(())
    }
}

/// Used when no mail transport is configured: the transcript goes to the log.
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "Mail relay not configured, transcript logged only"
        );
        Ok(())
    }
}

/// Fire-and-forget transcript mailing to a fixed recipient.
#[derive(Clone)]
pub struct TranscriptDispatcher {
    mailer: Arc<dyn MailSender>,
    from: String,
    recipient: String,
}

impl TranscriptDispatcher {
    pub fn new(
        mailer: Arc<dyn MailSender>,
        from: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            from: from.into(),
            recipient: recipient.into(),
        }
    }

    /// Pick [`HttpMailer`] when a relay URL is configured, [`SmtpMailer`]
    /// when mail account credentials are, [`LogMailer`] otherwise.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mailer: Arc<dyn MailSender> = match (
            &config.mail_api_url,
            &config.email_user,
            &config.email_pass,
        ) {
            (Some(url), _, _) => {
                info!(endpoint = %url, "Transcripts will be mailed via HTTP relay");
                Arc::new(HttpMailer::new(
                    url.clone(),
                    config.email_user.clone(),
                    config.email_pass.clone(),
                ))
            }
            (None, Some(user), Some(pass)) => {
                match SmtpMailer::new(&config.smtp_host, user.clone(), pass.clone()) {
                    Ok(mailer) => {
                        info!(host = %config.smtp_host, "Transcripts will be mailed via SMTP");
                        Arc::new(mailer)
                    }
                    Err(e) => {
                        error!(
                            host = %config.smtp_host,
                            error = %e,
                            "Invalid SMTP setup, transcripts will only be logged"
                        );
                        Arc::new(LogMailer)
                    }
                }
            }
            _ => {
                info!("No mail transport configured, transcripts will only be logged");
                Arc::new(LogMailer)
            }
        };

        let from = config
            .email_user
            .clone()
            .unwrap_or_else(|| DEFAULT_SENDER.to_string());

        Self::new(mailer, from, config.transcript_recipient.clone())
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Wrap a formatted transcript in the support email.
    pub fn compose(&self, transcript: &str) -> MailMessage {
        MailMessage {
            from: self.from.clone(),
            to: self.recipient.clone(),
            subject: TRANSCRIPT_SUBJECT.to_string(),
            body: format!("A user ended a live chat. Here's the transcript:\n\n{transcript}"),
        }
    }

    /// Send the transcript in the background.
    ///
    /// The returned handle may be dropped; the send still runs to completion.
    pub fn dispatch(&self, transcript: String) -> JoinHandle<()> {
        let message = self.compose(&transcript);
        let mailer = self.mailer.clone();

        tokio::spawn(async move {
            let to = message.to.clone();
            match mailer.send(message).await {
                Ok(()) => info!(to = %to, "Transcript email sent"),
                Err(e) => error!(to = %to, error = %e, "Transcript email failed"),
            }
        })
    }
}
