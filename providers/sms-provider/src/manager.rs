use crate::config::SmsSettings;
use crate::message::SmsMessage;
use provider_common::{
    MessageManager, MessageProvider, ProviderError, ProviderStats, RetryConfig, SelectionPolicy,
    SendResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Failover manager for outgoing SMS
pub struct SmsManager {
    inner: MessageManager<SmsMessage>,
}

impl SmsManager {
    pub fn new(policy: SelectionPolicy, retry: RetryConfig) -> Self {
        Self {
            inner: MessageManager::new("sms", policy, retry),
        }
    }

    pub fn from_settings(settings: &SmsSettings) -> Result<Self, ProviderError> {
        let mut manager = Self::new(settings.manager.strategy, settings.manager.retry_config());

        for descriptor in settings.providers() {
            let provider = descriptor.config.build()?;
            manager.register(provider, descriptor.priority)?;
        }

        info!(
            providers = ?manager.provider_names(),
            strategy = %settings.manager.strategy,
            "SMS manager initialized"
        );
        Ok(manager)
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn MessageProvider<SmsMessage>>,
        priority: u32,
    ) -> Result<(), ProviderError> {
        self.inner
            .register(provider, priority)
            .map_err(|e| ProviderError::InvalidConfiguration(e.to_string()))
    }

    pub async fn send_sms(&self, message: &SmsMessage) -> SendResult {
        self.inner.send(message).await
    }

    pub async fn send_within(&self, message: &SmsMessage, budget: Duration) -> SendResult {
        self.inner.send_within(message, budget).await
    }

    pub async fn test_all_connections(&self) -> BTreeMap<String, bool> {
        self.inner.test_all_connections().await
    }

    pub fn all_stats(&self) -> Vec<ProviderStats> {
        self.inner.all_stats()
    }

    pub fn reset_stats(&self) {
        self.inner.reset_stats()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.inner.provider_names()
    }
}
