//! SendGrid v3 Mail Send client

use crate::message::EmailMessage;
use async_trait::async_trait;
use provider_common::{MessageProvider, Provider, ProviderError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const SENDGRID_BASE_URL: &str = "https://api.sendgrid.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<Address<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dynamic_template_data: Option<&'a BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> Address<'a> {
    fn bare(email: &'a str) -> Self {
        Self { email, name: None }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    content: &'a str,
    filename: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    disposition: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    field: Option<String>,
}

pub struct SendGridProvider {
    client: Client,
    config: SendGridConfig,
    base_url: String,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| SENDGRID_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    fn build_request<'a>(&'a self, message: &'a EmailMessage) -> MailSendRequest<'a> {
        let template = message.template.as_ref();

        let mut content = Vec::new();
        if let Some(text) = &message.text {
            content.push(Content {
                content_type: "text/plain",
                value: text,
            });
        }
        if let Some(html) = &message.html {
            content.push(Content {
                content_type: "text/html",
                value: html,
            });
        }

        MailSendRequest {
            personalizations: vec![Personalization {
                to: message.to.iter().map(|a| Address::bare(a)).collect(),
                cc: message.cc.iter().map(|a| Address::bare(a)).collect(),
                bcc: message.bcc.iter().map(|a| Address::bare(a)).collect(),
                dynamic_template_data: template.map(|t| &t.params),
            }],
            from: Address {
                email: &self.config.from_email,
                name: self.config.from_name.as_deref(),
            },
            reply_to: message.reply_to.as_deref().map(Address::bare),
            subject: Some(message.subject.as_str()).filter(|s| !s.is_empty()),
            content,
            template_id: template.map(|t| t.id.as_str()),
            attachments: message
                .attachments
                .iter()
                .map(|a| Attachment {
                    content: &a.content,
                    filename: &a.filename,
                    content_type: &a.content_type,
                    disposition: "attachment",
                })
                .collect(),
        }
    }

    pub async fn deliver(&self, message: &EmailMessage) -> Result<(), ProviderError> {
        message.validate()?;
        let request = self.build_request(message);

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::ACCEPTED => {
                let message_id = response
                    .headers()
                    .get("X-Message-Id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                debug!(message_id = %message_id, "SendGrid accepted email");
                Ok(())
            }
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
                let body: ErrorBody = response.json().await.unwrap_or_default();
                let message = body
                    .errors
                    .iter()
                    .map(|e| match &e.field {
                        Some(field) => format!("{}: {}", field, e.message),
                        None => e.message.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(ProviderError::Rejected {
                    code: status.as_u16().to_string(),
                    message,
                })
            }
            other => Err(ProviderError::from_status(other.as_u16())),
        }
    }
}

#[async_trait]
impl Provider for SendGridProvider {
    fn name(&self) -> &str {
        "sendgrid"
    }

    async fn test_connection(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/v3/scopes", self.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "SendGrid connection test rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "SendGrid connection test failed");
                false
            }
        }
    }
}

#[async_trait]
impl MessageProvider<EmailMessage> for SendGridProvider {
    async fn send(&self, message: &EmailMessage) -> bool {
        match self.deliver(message).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    provider = "sendgrid",
                    error_code = e.error_code(),
                    error = %e,
                    "Failed to send email"
                );
                false
            }
        }
    }
}
