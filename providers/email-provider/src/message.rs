use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use email_address::EmailAddress;
use provider_common::ProviderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One email to deliver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Vendor-side template, rendered by the provider when supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<EmailTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: String, // Base64 encoded
    pub content_type: String,
}

impl EmailAttachment {
    pub fn from_bytes(filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        Self {
            filename: filename.to_string(),
            content: BASE64.encode(bytes),
            content_type: content_type.to_string(),
        }
    }

    pub fn decoded(&self) -> Result<Vec<u8>, ProviderError> {
        BASE64.decode(&self.content).map_err(|e| {
            ProviderError::MalformedPayload(format!(
                "Attachment {} is not valid base64: {}",
                self.filename, e
            ))
        })
    }
}

impl EmailMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_template(mut self, template: EmailTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_attachment(mut self, attachment: EmailAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Every address the message is delivered to
    pub fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.to.is_empty() {
            return Err(ProviderError::MalformedPayload(
                "At least one recipient is required".to_string(),
            ));
        }

        for address in self.recipients().chain(self.reply_to.iter()) {
            if !EmailAddress::is_valid(address) {
                return Err(ProviderError::MalformedPayload(format!(
                    "Invalid email address: {}",
                    address
                )));
            }
        }

        if self.template.is_none() {
            if self.subject.trim().is_empty() {
                return Err(ProviderError::MalformedPayload(
                    "Subject is required".to_string(),
                ));
            }
            if self.text.is_none() && self.html.is_none() {
                return Err(ProviderError::MalformedPayload(
                    "Either text or html content is required".to_string(),
                ));
            }
        }

        Ok(())
    }
}
