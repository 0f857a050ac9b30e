//! SMTP delivery through lettre's async transport

use crate::message::EmailMessage;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use provider_common::{MessageProvider, Provider, ProviderError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Port using implicit TLS; every other port upgrades with STARTTLS
pub const SMTPS_PORT: u16 = 465;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    30
}

pub struct SmtpProvider {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> Result<Self, ProviderError> {
        let builder = if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| {
            ProviderError::InvalidConfiguration(format!("Invalid SMTP relay {}: {}", config.host, e))
        })?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { config, transport })
    }

    pub async fn deliver(&self, message: &EmailMessage) -> Result<(), ProviderError> {
        let email = build_message(&self.config, message)?;

        let response = self.transport.send(email).await.map_err(|e| {
            if e.is_permanent() {
                ProviderError::Rejected {
                    code: e
                        .status()
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "permanent".to_string()),
                    message: e.to_string(),
                }
            } else if e.is_timeout() {
                ProviderError::NetworkTimeout
            } else {
                ProviderError::NetworkError(e.to_string())
            }
        })?;

        debug!(code = %response.code(), "SMTP server accepted email");
        Ok(())
    }
}

fn mailbox(address: &str, name: Option<&str>) -> Result<Mailbox, ProviderError> {
    let address: Address = address
        .parse()
        .map_err(|e| ProviderError::MalformedPayload(format!("Invalid address {}: {}", address, e)))?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

/// Build the MIME message: plain/html alternative, wrapped in a mixed part
/// when attachments are present
pub fn build_message(config: &SmtpConfig, message: &EmailMessage) -> Result<Message, ProviderError> {
    message.validate()?;

    if message.template.is_some() && message.text.is_none() && message.html.is_none() {
        return Err(ProviderError::MalformedPayload(
            "SMTP cannot render vendor templates".to_string(),
        ));
    }

    let mut builder = Message::builder()
        .from(mailbox(&config.from_email, config.from_name.as_deref())?)
        .subject(message.subject.clone());

    for to in &message.to {
        builder = builder.to(mailbox(to, None)?);
    }
    for cc in &message.cc {
        builder = builder.cc(mailbox(cc, None)?);
    }
    for bcc in &message.bcc {
        builder = builder.bcc(mailbox(bcc, None)?);
    }
    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(mailbox(reply_to, None)?);
    }

    let body = match (&message.text, &message.html) {
        (text, Some(html)) => {
            let text = text
                .clone()
                .unwrap_or_else(|| html2text::from_read(html.as_bytes(), 80));
            MultiPart::alternative_plain_html(text, html.clone())
        }
        (Some(text), None) => MultiPart::alternative().singlepart(SinglePart::plain(text.clone())),
        (None, None) => {
            return Err(ProviderError::MalformedPayload(
                "Either text or html content is required".to_string(),
            ))
        }
    };

    let body = if message.attachments.is_empty() {
        body
    } else {
        let mut mixed = MultiPart::mixed().multipart(body);
        for attachment in &message.attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                ProviderError::MalformedPayload(format!(
                    "Invalid content type {}: {}",
                    attachment.content_type, e
                ))
            })?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.decoded()?, content_type),
            );
        }
        mixed
    };

    builder
        .multipart(body)
        .map_err(|e| ProviderError::MalformedPayload(e.to_string()))
}

#[async_trait]
impl Provider for SmtpProvider {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn test_connection(&self) -> bool {
        match self.transport.test_connection().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(host = %self.config.host, error = %e, "SMTP connection test failed");
                false
            }
        }
    }
}

#[async_trait]
impl MessageProvider<EmailMessage> for SmtpProvider {
    async fn send(&self, message: &EmailMessage) -> bool {
        match self.deliver(message).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    provider = "smtp",
                    error_code = e.error_code(),
                    error = %e,
                    "Failed to send email"
                );
                false
            }
        }
    }
}
