use crate::message::EmailMessage;
use crate::sendgrid::{SendGridConfig, SendGridProvider};
use crate::smtp::{SmtpConfig, SmtpProvider};
use config::{Config, ConfigError, Environment, File};
use provider_common::{
    enabled_in_priority_order, ManagerSettings, MessageProvider, ProviderDescriptor, ProviderError,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tracing::debug;

/// Vendor selection for one email provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailProviderConfig {
    Smtp(SmtpConfig),
    Sendgrid(SendGridConfig),
}

impl EmailProviderConfig {
    pub fn provider_type(&self) -> &'static str {
        match self {
            EmailProviderConfig::Smtp(_) => "smtp",
            EmailProviderConfig::Sendgrid(_) => "sendgrid",
        }
    }

    /// Construct the vendor implementation for this config
    pub fn build(&self) -> Result<Arc<dyn MessageProvider<EmailMessage>>, ProviderError> {
        Ok(match self {
            EmailProviderConfig::Smtp(config) => Arc::new(SmtpProvider::new(config.clone())?),
            EmailProviderConfig::Sendgrid(config) => {
                Arc::new(SendGridProvider::new(config.clone())?)
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub enabled: Option<bool>,
    pub priority: Option<u32>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendGridSettings {
    pub enabled: Option<bool>,
    pub priority: Option<u32>,
    pub api_key: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Email configuration, loaded from `EMAIL_*` environment variables
///
/// `EMAIL_STRATEGY=round-robin`, `EMAIL_SMTP__HOST=smtp.example.com`,
/// `EMAIL_SENDGRID__API_KEY=...`. A provider whose required keys are missing
/// is left out without an error.
/// Only deserializable: `manager` comes from the top-level keys, which
/// `from_config` reads in a second pass.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmailSettings {
    /// Read from the top-level keys by `from_config`
    #[serde(skip)]
    pub manager: ManagerSettings,
    /// Default sender for providers that do not set their own
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    #[serde(default)]
    pub smtp: SmtpSettings,
    #[serde(default)]
    pub sendgrid: SendGridSettings,
}

impl EmailSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("strategy", "priority")?
            .set_default("retry_attempts", 3)?
            .set_default("retry_base_delay_ms", 1000)?;

        // Try to load from config file if it exists
        if let Ok(config_path) = env::var("EMAIL_CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("EMAIL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_config(builder.build()?)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let mut settings: EmailSettings = config.clone().try_deserialize()?;
        settings.manager = config.try_deserialize()?;
        settings.manager.validate()?;
        Ok(settings)
    }

    /// Enabled providers with complete credentials, in priority order
    pub fn providers(&self) -> Vec<ProviderDescriptor<EmailProviderConfig>> {
        let mut descriptors = Vec::new();

        if let Some(descriptor) = self.smtp_descriptor() {
            descriptors.push(descriptor);
        } else {
            debug!("SMTP provider not configured");
        }

        if let Some(descriptor) = self.sendgrid_descriptor() {
            descriptors.push(descriptor);
        } else {
            debug!("SendGrid provider not configured");
        }

        enabled_in_priority_order(descriptors)
    }

    fn smtp_descriptor(&self) -> Option<ProviderDescriptor<EmailProviderConfig>> {
        let smtp = &self.smtp;
        let config = SmtpConfig {
            host: smtp.host.clone()?,
            port: smtp.port.unwrap_or(587),
            username: smtp.username.clone()?,
            password: smtp.password.clone()?,
            from_email: smtp.from_email.clone().or_else(|| self.from_email.clone())?,
            from_name: smtp.from_name.clone().or_else(|| self.from_name.clone()),
            timeout_secs: smtp.timeout_secs.unwrap_or(30),
        };

        Some(
            ProviderDescriptor::new(EmailProviderConfig::Smtp(config), smtp.priority.unwrap_or(1))
                .with_enabled(smtp.enabled.unwrap_or(true)),
        )
    }

    fn sendgrid_descriptor(&self) -> Option<ProviderDescriptor<EmailProviderConfig>> {
        let sendgrid = &self.sendgrid;
        let config = SendGridConfig {
            api_key: sendgrid.api_key.clone()?,
            from_email: sendgrid
                .from_email
                .clone()
                .or_else(|| self.from_email.clone())?,
            from_name: sendgrid.from_name.clone().or_else(|| self.from_name.clone()),
            base_url: sendgrid.base_url.clone(),
            timeout_secs: sendgrid.timeout_secs.unwrap_or(30),
        };

        Some(
            ProviderDescriptor::new(
                EmailProviderConfig::Sendgrid(config),
                sendgrid.priority.unwrap_or(2),
            )
            .with_enabled(sendgrid.enabled.unwrap_or(true)),
        )
    }
}
