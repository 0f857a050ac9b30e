use crate::alipay::{AlipayConfig, AlipayProvider};
use crate::ledger::{OrderLedger, DEFAULT_CAPACITY, DEFAULT_RETENTION_MINUTES};
use crate::provider::PaymentProvider;
use crate::wechat::{WechatPayConfig, WechatPayProvider};
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use provider_common::{enabled_in_priority_order, ManagerSettings, ProviderDescriptor, ProviderError};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaymentProviderConfig {
    Alipay(AlipayConfig),
    Wechat(WechatPayConfig),
}

impl PaymentProviderConfig {
    pub fn provider_type(&self) -> &'static str {
        match self {
            PaymentProviderConfig::Alipay(_) => "alipay",
            PaymentProviderConfig::Wechat(_) => "wechat",
        }
    }

    /// Malformed key material fails here, at construction
    pub fn build(&self) -> Result<Arc<dyn PaymentProvider>, ProviderError> {
        Ok(match self {
            PaymentProviderConfig::Alipay(config) => Arc::new(AlipayProvider::new(config.clone())?),
            PaymentProviderConfig::Wechat(config) => {
                Arc::new(WechatPayProvider::new(config.clone())?)
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlipaySettings {
    pub enabled: Option<bool>,
    pub priority: Option<u32>,
    pub app_id: Option<String>,
    pub private_key: Option<String>,
    pub alipay_public_key: Option<String>,
    pub gateway: Option<String>,
    pub notify_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WechatSettings {
    pub enabled: Option<bool>,
    pub priority: Option<u32>,
    pub app_id: Option<String>,
    pub mch_id: Option<String>,
    pub api_key: Option<String>,
    pub notify_url: Option<String>,
    pub endpoint: Option<String>,
    pub client_cert_pem: Option<String>,
    pub client_key_pem: Option<String>,
    pub spbill_create_ip: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Payment configuration, loaded from `PAYMENT_*` environment variables
///
/// `PAYMENT_ALIPAY__APP_ID=...`, `PAYMENT_WECHAT__MCH_ID=...`.
/// Only deserializable: `manager` comes from the top-level keys, which
/// `from_config` reads in a second pass.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaymentSettings {
    /// Read from the top-level keys by `from_config`
    #[serde(skip)]
    pub manager: ManagerSettings,
    #[serde(default)]
    pub alipay: AlipaySettings,
    #[serde(default)]
    pub wechat: WechatSettings,
    /// Minutes a settled order stays in the ledger after its last change
    pub ledger_retention_minutes: Option<i64>,
    /// Orders kept in the ledger before the oldest are dropped
    pub ledger_capacity: Option<usize>,
}

impl PaymentSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("strategy", "priority")?
            .set_default("retry_attempts", 3)?
            .set_default("retry_base_delay_ms", 1000)?;

        if let Ok(config_path) = env::var("PAYMENT_CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        }

        builder = builder.add_source(
            Environment::with_prefix("PAYMENT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_config(builder.build()?)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let mut settings: PaymentSettings = config.clone().try_deserialize()?;
        settings.manager = config.try_deserialize()?;
        settings.manager.validate()?;
        Ok(settings)
    }

    pub fn ledger(&self) -> OrderLedger {
        OrderLedger::with_limits(
            Duration::minutes(self.ledger_retention_minutes.unwrap_or(DEFAULT_RETENTION_MINUTES)),
            self.ledger_capacity.unwrap_or(DEFAULT_CAPACITY),
        )
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor<PaymentProviderConfig>> {
        let mut descriptors = Vec::new();

        match self.alipay_descriptor() {
            Some(descriptor) => descriptors.push(descriptor),
            None => debug!("Alipay provider not configured"),
        }
        match self.wechat_descriptor() {
            Some(descriptor) => descriptors.push(descriptor),
            None => debug!("WeChat Pay provider not configured"),
        }

        enabled_in_priority_order(descriptors)
    }

    fn alipay_descriptor(&self) -> Option<ProviderDescriptor<PaymentProviderConfig>> {
        let alipay = &self.alipay;
        let config = AlipayConfig {
            app_id: alipay.app_id.clone()?,
            private_key: alipay.private_key.clone()?,
            alipay_public_key: alipay.alipay_public_key.clone()?,
            gateway: alipay.gateway.clone(),
            notify_url: alipay.notify_url.clone(),
            timeout_secs: alipay.timeout_secs.unwrap_or(30),
        };

        Some(
            ProviderDescriptor::new(
                PaymentProviderConfig::Alipay(config),
                alipay.priority.unwrap_or(1),
            )
            .with_enabled(alipay.enabled.unwrap_or(true)),
        )
    }

    fn wechat_descriptor(&self) -> Option<ProviderDescriptor<PaymentProviderConfig>> {
        let wechat = &self.wechat;
        let config = WechatPayConfig {
            app_id: wechat.app_id.clone()?,
            mch_id: wechat.mch_id.clone()?,
            api_key: wechat.api_key.clone()?,
            notify_url: wechat.notify_url.clone()?,
            endpoint: wechat.endpoint.clone(),
            client_cert_pem: wechat.client_cert_pem.clone(),
            client_key_pem: wechat.client_key_pem.clone(),
            spbill_create_ip: wechat
                .spbill_create_ip
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            timeout_secs: wechat.timeout_secs.unwrap_or(30),
        };

        Some(
            ProviderDescriptor::new(
                PaymentProviderConfig::Wechat(config),
                wechat.priority.unwrap_or(2),
            )
            .with_enabled(wechat.enabled.unwrap_or(true)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider_common::SelectionPolicy;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_wechat_only() {
        let settings = PaymentSettings::from_config(config(&[
            ("strategy", "round-robin"),
            ("alipay.app_id", "2021000000000001"),
            ("wechat.app_id", "wx123"),
            ("wechat.mch_id", "10000100"),
            ("wechat.api_key", "key"),
            ("wechat.notify_url", "https://hr.example.com/payments/wechat"),
        ]))
        .unwrap();

        assert_eq!(settings.manager.strategy, SelectionPolicy::RoundRobin);
        let providers = settings.providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].config.provider_type(), "wechat");
        assert_eq!(providers[0].priority, 2);
    }

    #[test]
    fn test_ledger_limits_and_strategy_survive_loading() {
        let settings = PaymentSettings::from_config(config(&[
            ("strategy", "round-robin"),
            ("retry_attempts", "5"),
            ("ledger_retention_minutes", "90"),
            ("ledger_capacity", "500"),
        ]))
        .unwrap();

        assert_eq!(settings.manager.strategy, SelectionPolicy::RoundRobin);
        assert_eq!(settings.manager.retry_attempts, 5);
        assert_eq!(settings.ledger_retention_minutes, Some(90));
        assert_eq!(settings.ledger_capacity, Some(500));
        assert!(settings.ledger().is_empty());
    }

    #[test]
    fn test_disabled_provider_is_skipped() {
        let config = Config::builder()
            .add_source(config(&[
                ("wechat.app_id", "wx123"),
                ("wechat.mch_id", "10000100"),
                ("wechat.api_key", "key"),
                ("wechat.notify_url", "https://hr.example.com/payments/wechat"),
            ]))
            .set_override("wechat.enabled", false)
            .unwrap()
            .build()
            .unwrap();
        let settings = PaymentSettings::from_config(config).unwrap();

        assert!(settings.providers().is_empty());
    }

    #[test]
    fn test_malformed_alipay_key_fails_build() {
        let settings = PaymentSettings::from_config(config(&[
            ("alipay.app_id", "2021000000000001"),
            ("alipay.private_key", "bm90IGEga2V5"),
            ("alipay.alipay_public_key", "bm90IGEga2V5"),
        ]))
        .unwrap();

        let providers = settings.providers();
        assert_eq!(providers.len(), 1);
        assert!(matches!(
            providers[0].config.build(),
            Err(ProviderError::InvalidConfiguration(_))
        ));
    }
}
