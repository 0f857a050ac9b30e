//! Composition root for the HR communications and payments core
//!
//! Configuration is read once per process; the resulting managers are
//! shared through an `Arc<CommsHub>` instead of a global singleton.

use config::ConfigError;
use email_provider::{EmailManager, EmailService, EmailSettings};
use payment_provider::{PaymentError, PaymentManager, PaymentSettings};
use provider_common::{ProviderError, ProviderStats};
use serde::{Deserialize, Serialize};
use sms_provider::{SmsManager, SmsService, SmsSettings};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid {domain} configuration: {source}")]
    Config {
        domain: &'static str,
        #[source]
        source: ConfigError,
    },

    #[error("failed to build {domain} providers: {source}")]
    Provider {
        domain: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// Settings for every domain, loaded from `EMAIL_*`, `SMS_*` and `PAYMENT_*`.
/// Build it with `from_env`; it has no serialized form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubConfig {
    pub email: EmailSettings,
    pub sms: SmsSettings,
    pub payments: PaymentSettings,
}

impl HubConfig {
    pub fn from_env() -> Result<Self, HubError> {
        Ok(Self {
            email: EmailSettings::from_env().map_err(|source| HubError::Config {
                domain: "email",
                source,
            })?,
            sms: SmsSettings::from_env().map_err(|source| HubError::Config {
                domain: "sms",
                source,
            })?,
            payments: PaymentSettings::from_env().map_err(|source| HubError::Config {
                domain: "payment",
                source,
            })?,
        })
    }
}

/// Connection probe results per domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub email: BTreeMap<String, bool>,
    pub sms: BTreeMap<String, bool>,
    pub payments: BTreeMap<String, bool>,
}

impl ConnectionReport {
    pub fn all_healthy(&self) -> bool {
        self.email
            .values()
            .chain(self.sms.values())
            .chain(self.payments.values())
            .all(|ok| *ok)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub email: Vec<ProviderStats>,
    pub sms: Vec<ProviderStats>,
    pub payments: Vec<ProviderStats>,
}

pub struct CommsHub {
    email: EmailService,
    sms: SmsService,
    payments: Arc<PaymentManager>,
}

impl CommsHub {
    /// Must run inside a tokio runtime: the SMTP transport owns a
    /// connection pool.
    pub fn from_config(config: &HubConfig) -> Result<Arc<Self>, HubError> {
        let email = EmailManager::from_settings(&config.email).map_err(|source| {
            HubError::Provider {
                domain: "email",
                source,
            }
        })?;
        let sms = SmsManager::from_settings(&config.sms).map_err(|source| HubError::Provider {
            domain: "sms",
            source,
        })?;
        let payments = PaymentManager::from_settings(&config.payments)?;

        let hub = Self {
            email: EmailService::new(Arc::new(email)),
            sms: SmsService::new(Arc::new(sms))
                .with_verification_template(config.sms.verification_template()),
            payments: Arc::new(payments),
        };

        info!(
            email = ?hub.email.manager().provider_names(),
            sms = ?hub.sms.manager().provider_names(),
            payments = ?hub.payments.provider_names(),
            "Communications hub ready"
        );
        Ok(Arc::new(hub))
    }

    pub fn from_env() -> Result<Arc<Self>, HubError> {
        Self::from_config(&HubConfig::from_env()?)
    }

    pub fn email(&self) -> &EmailService {
        &self.email
    }

    pub fn sms(&self) -> &SmsService {
        &self.sms
    }

    pub fn payments(&self) -> &Arc<PaymentManager> {
        &self.payments
    }

    /// Probe every provider of every domain concurrently
    pub async fn test_all_connections(&self) -> ConnectionReport {
        let (email, sms, payments) = tokio::join!(
            self.email.test_connection(),
            self.sms.test_connection(),
            self.payments.test_all_connections(),
        );
        ConnectionReport {
            email,
            sms,
            payments,
        }
    }

    pub fn all_stats(&self) -> StatsReport {
        StatsReport {
            email: self.email.get_stats(),
            sms: self.sms.get_stats(),
            payments: self.payments.all_stats(),
        }
    }
}
