use crate::config::EmailSettings;
use crate::message::EmailMessage;
use provider_common::{
    MessageManager, MessageProvider, ProviderError, ProviderStats, RetryConfig, SelectionPolicy,
    SendResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Failover manager for outgoing email
pub struct EmailManager {
    inner: MessageManager<EmailMessage>,
}

impl EmailManager {
    pub fn new(policy: SelectionPolicy, retry: RetryConfig) -> Self {
        Self {
            inner: MessageManager::new("email", policy, retry),
        }
    }

    /// Build every configured provider once. Malformed provider
    /// configuration is an error; absent configuration is not.
    pub fn from_settings(settings: &EmailSettings) -> Result<Self, ProviderError> {
        let mut manager = Self::new(settings.manager.strategy, settings.manager.retry_config());

        for descriptor in settings.providers() {
            let provider = descriptor.config.build()?;
            manager.register(provider, descriptor.priority)?;
        }

        info!(
            providers = ?manager.provider_names(),
            strategy = %settings.manager.strategy,
            "Email manager initialized"
        );
        Ok(manager)
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn MessageProvider<EmailMessage>>,
        priority: u32,
    ) -> Result<(), ProviderError> {
        self.inner
            .register(provider, priority)
            .map_err(|e| ProviderError::InvalidConfiguration(e.to_string()))
    }

    pub async fn send_email(&self, message: &EmailMessage) -> SendResult {
        self.inner.send(message).await
    }

    pub async fn send_within(&self, message: &EmailMessage, budget: Duration) -> SendResult {
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

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
