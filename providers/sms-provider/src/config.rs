use crate::aliyun::{AliyunSmsConfig, AliyunSmsProvider};
use crate::message::SmsMessage;
use crate::tencent::{TencentSmsConfig, TencentSmsProvider};
use config::{Config, ConfigError, Environment, File};
use provider_common::{
    enabled_in_priority_order, ManagerSettings, MessageProvider, ProviderDescriptor, ProviderError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_VERIFICATION_TEMPLATE: &str = "verification";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SmsProviderConfig {
    Aliyun(AliyunSmsConfig),
    Tencent(TencentSmsConfig),
}

impl SmsProviderConfig {
    pub fn provider_type(&self) -> &'static str {
        match self {
            SmsProviderConfig::Aliyun(_) => "aliyun",
            SmsProviderConfig::Tencent(_) => "tencent",
        }
    }

    pub fn build(&self) -> Result<Arc<dyn MessageProvider<SmsMessage>>, ProviderError> {
        Ok(match self {
            SmsProviderConfig::Aliyun(config) => Arc::new(AliyunSmsProvider::new(config.clone())?),
            SmsProviderConfig::Tencent(config) => {
                Arc::new(TencentSmsProvider::new(config.clone())?)
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliyunSettings {
    pub enabled: Option<bool>,
    pub priority: Option<u32>,
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    pub sign_name: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TencentSettings {
    pub enabled: Option<bool>,
    pub priority: Option<u32>,
    pub secret_id: Option<String>,
    pub secret_key: Option<String>,
    pub sdk_app_id: Option<String>,
    pub sign_name: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
}

/// SMS configuration, loaded from `SMS_*` environment variables
///
/// `SMS_ALIYUN__ACCESS_KEY_ID=...`, `SMS_TENCENT__TEMPLATES__VERIFICATION=1234567`.
/// Only deserializable: `manager` comes from the top-level keys, which
/// `from_config` reads in a second pass.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SmsSettings {
    /// Read from the top-level keys by `from_config`
    #[serde(skip)]
    pub manager: ManagerSettings,
    /// Logical template used for verification codes
    pub verification_template: Option<String>,
    /// Signature shared by providers that do not set their own
    pub sign_name: Option<String>,
    #[serde(default)]
    pub aliyun: AliyunSettings,
    #[serde(default)]
    pub tencent: TencentSettings,
}

impl SmsSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("strategy", "priority")?
            .set_default("retry_attempts", 3)?
            .set_default("retry_base_delay_ms", 1000)?;

        if let Ok(config_path) = env::var("SMS_CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        }

        builder = builder.add_source(
            Environment::with_prefix("SMS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_config(builder.build()?)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let mut settings: SmsSettings = config.clone().try_deserialize()?;
        settings.manager = config.try_deserialize()?;
        settings.manager.validate()?;
        Ok(settings)
    }

    pub fn verification_template(&self) -> &str {
        self.verification_template
            .as_deref()
            .unwrap_or(DEFAULT_VERIFICATION_TEMPLATE)
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor<SmsProviderConfig>> {
        let mut descriptors = Vec::new();

        match self.aliyun_descriptor() {
            Some(descriptor) => descriptors.push(descriptor),
            None => debug!("Aliyun SMS provider not configured"),
        }
        match self.tencent_descriptor() {
            Some(descriptor) => descriptors.push(descriptor),
            None => debug!("Tencent SMS provider not configured"),
        }

        enabled_in_priority_order(descriptors)
    }

    fn aliyun_descriptor(&self) -> Option<ProviderDescriptor<SmsProviderConfig>> {
        let aliyun = &self.aliyun;
        let config = AliyunSmsConfig {
            access_key_id: aliyun.access_key_id.clone()?,
            access_key_secret: aliyun.access_key_secret.clone()?,
            sign_name: aliyun.sign_name.clone().or_else(|| self.sign_name.clone())?,
            region: aliyun
                .region
                .clone()
                .unwrap_or_else(|| "cn-hangzhou".to_string()),
            endpoint: aliyun.endpoint.clone(),
            templates: aliyun.templates.clone(),
            timeout_secs: aliyun.timeout_secs.unwrap_or(10),
        };

        Some(
            ProviderDescriptor::new(SmsProviderConfig::Aliyun(config), aliyun.priority.unwrap_or(1))
                .with_enabled(aliyun.enabled.unwrap_or(true)),
        )
    }

    fn tencent_descriptor(&self) -> Option<ProviderDescriptor<SmsProviderConfig>> {
        let tencent = &self.tencent;
        let config = TencentSmsConfig {
            secret_id: tencent.secret_id.clone()?,
            secret_key: tencent.secret_key.clone()?,
            sdk_app_id: tencent.sdk_app_id.clone()?,
            sign_name: tencent.sign_name.clone().or_else(|| self.sign_name.clone())?,
            region: tencent
                .region
                .clone()
                .unwrap_or_else(|| "ap-guangzhou".to_string()),
            endpoint: tencent.endpoint.clone(),
            templates: tencent.templates.clone(),
            timeout_secs: tencent.timeout_secs.unwrap_or(10),
        };

        Some(
            ProviderDescriptor::new(
                SmsProviderConfig::Tencent(config),
                tencent.priority.unwrap_or(2),
            )
            .with_enabled(tencent.enabled.unwrap_or(true)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_shared_sign_name_fills_in() {
        let settings = SmsSettings::from_config(config(&[
            ("sign_name", "HR"),
            ("aliyun.access_key_id", "id"),
            ("aliyun.access_key_secret", "secret"),
            ("tencent.secret_id", "AKID"),
            ("tencent.secret_key", "key"),
            ("tencent.sdk_app_id", "1400000000"),
            ("tencent.templates.verification", "1234567"),
        ]))
        .unwrap();

        let providers = settings.providers();
        assert_eq!(providers.len(), 2);
        match &providers[1].config {
            SmsProviderConfig::Tencent(config) => {
                assert_eq!(config.sign_name, "HR");
                assert_eq!(config.templates["verification"], "1234567");
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_tencent_is_skipped() {
        let settings = SmsSettings::from_config(config(&[
            ("tencent.secret_id", "AKID"),
            ("tencent.secret_key", "key"),
            ("tencent.sign_name", "HR"),
        ]))
        .unwrap();

        assert!(settings.providers().is_empty());
        assert_eq!(settings.verification_template(), "verification");
    }
}
