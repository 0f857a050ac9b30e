use crate::policy::SelectionPolicy;
use crate::retry::{RetryConfig, DEFAULT_BASE_DELAY_MS, DEFAULT_RETRY_ATTEMPTS};
use config::ConfigError;
use serde::{Deserialize, Serialize};

pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Manager-level settings shared by every domain
///
/// The keys sit at the top level of each domain's configuration
/// (`EMAIL_STRATEGY`, `SMS_RETRY_ATTEMPTS`, ...) and are deserialized from
/// the same source as the domain settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSettings {
    #[serde(default)]
    pub strategy: SelectionPolicy,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            strategy: SelectionPolicy::default(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl ManagerSettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.retry_attempts, self.retry_base_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_attempts == 0 || self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Message(format!(
                "retry_attempts must be between 1 and {}",
                MAX_RETRY_ATTEMPTS
            )));
        }
        Ok(())
    }
}
