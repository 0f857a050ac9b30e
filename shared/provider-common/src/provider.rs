//! Provider contract
//!
//! A provider wraps exactly one vendor behind a uniform interface. Every
//! operation is infallible from the caller's point of view: vendor rejections,
//! network failures and malformed responses are logged by the provider and
//! reported as `false`/`None`, so the manager's retry loop is never bypassed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Base trait that all providers implement
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name, unique within one manager
    fn name(&self) -> &str;

    /// Non-destructive liveness probe against the vendor
    async fn test_connection(&self) -> bool;
}

/// A provider that delivers one kind of message
#[async_trait]
pub trait MessageProvider<M>: Provider
where
    M: Send + Sync,
{
    /// Attempt a single delivery
    async fn send(&self, message: &M) -> bool;
}

/// Static registration data for one provider
///
/// `config` is a closed enum per domain whose variant selects the vendor
/// implementation; descriptors are immutable once the manager is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor<C> {
    pub config: C,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
}

fn default_enabled() -> bool {
    true
}

impl<C> ProviderDescriptor<C> {
    pub fn new(config: C, priority: u32) -> Self {
        Self {
            config,
            enabled: true,
            priority,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Drop disabled descriptors and order the rest by ascending priority.
///
/// The sort is stable, so descriptors sharing a priority keep their
/// configuration order.
pub fn enabled_in_priority_order<C>(
    descriptors: Vec<ProviderDescriptor<C>>,
) -> Vec<ProviderDescriptor<C>> {
    let mut enabled: Vec<_> = descriptors.into_iter().filter(|d| d.enabled).collect();
    enabled.sort_by_key(|d| d.priority);
    enabled
}
