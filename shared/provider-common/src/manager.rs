//! Generic message manager
//!
//! One manager per message kind owns an immutable set of providers and
//! routes every send through the failover pool.

use crate::error::DispatchError;
use crate::policy::SelectionPolicy;
use crate::pool::{Delivered, ProviderPool};
use crate::provider::MessageProvider;
use crate::retry::RetryConfig;
use crate::stats::ProviderStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument};

/// Outcome of one send call as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    /// Provider that delivered the message
    pub provider: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl<T> From<Result<Delivered<T>, DispatchError>> for SendResult {
    fn from(result: Result<Delivered<T>, DispatchError>) -> Self {
        match result {
            Ok(delivered) => SendResult {
                success: true,
                provider: Some(delivered.provider),
                attempts: delivered.attempts,
                error: None,
            },
            Err(err) => SendResult {
                success: false,
                provider: None,
                attempts: err.attempts(),
                error: Some(err.to_string()),
            },
        }
    }
}

pub struct MessageManager<M: Send + Sync + 'static> {
    kind: &'static str,
    pool: ProviderPool<dyn MessageProvider<M>>,
}

impl<M: Send + Sync + 'static> MessageManager<M> {
    pub fn new(kind: &'static str, policy: SelectionPolicy, retry: RetryConfig) -> Self {
        Self {
            kind,
            pool: ProviderPool::new(policy, retry),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn MessageProvider<M>>,
        priority: u32,
    ) -> Result<(), DispatchError> {
        self.pool.register(provider, priority)
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.pool.provider_names()
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.pool.policy()
    }

    /// Deliver `message` through the first provider that accepts it
    pub async fn send(&self, message: &M) -> SendResult {
        self.try_send(message, None).await.into()
    }

    /// Like [`send`](Self::send), bounded by an overall time budget
    pub async fn send_within(&self, message: &M, budget: Duration) -> SendResult {
        self.try_send(message, Some(Instant::now() + budget))
            .await
            .into()
    }

    #[instrument(skip(self, message), fields(kind = self.kind))]
    pub async fn try_send(
        &self,
        message: &M,
        deadline: Option<Instant>,
    ) -> Result<Delivered<()>, DispatchError> {
        let delivered = self
            .pool
            .execute("send", deadline, |provider| async move {
                provider.send(message).await.then_some(())
            })
            .await?;

        info!(
            provider = %delivered.provider,
            attempts = delivered.attempts,
            "Message delivered"
        );
        Ok(delivered)
    }

    pub async fn test_all_connections(&self) -> BTreeMap<String, bool> {
        self.pool.test_all().await
    }

    pub fn all_stats(&self) -> Vec<ProviderStats> {
        self.pool.stats()
    }

    pub fn reset_stats(&self) {
        self.pool.reset_stats()
    }
}
