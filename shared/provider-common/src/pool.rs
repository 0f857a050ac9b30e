//! Provider pool with ordered selection, per-provider retry and failover
//!
//! Manages the providers of one manager with:
//! - Priority, round-robin or random ordering per call
//! - Up to `attempts` tries per provider with linear backoff in between
//! - Fall-through to the next provider once one is exhausted
//! - First success wins; nothing is fanned out
//!
//! Total attempts per call never exceed `providers * attempts`.

use crate::error::DispatchError;
use crate::policy::SelectionPolicy;
use crate::provider::Provider;
use crate::retry::RetryConfig;
use crate::stats::{ProviderStats, StatsCounter};
use backoff::backoff::Backoff;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Successful outcome of a pooled operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered<T> {
    /// Name of the provider whose attempt succeeded
    pub provider: String,
    /// Attempts made across all providers, including the successful one
    pub attempts: u32,
    pub value: T,
}

struct ProviderSlot<P: ?Sized> {
    provider: Arc<P>,
    priority: u32,
    stats: StatsCounter,
}

enum SlotOutcome<T> {
    Succeeded(T),
    Exhausted,
    DeadlineExceeded,
}

pub struct ProviderPool<P: ?Sized> {
    /// Sorted by ascending priority, registration order within a priority
    slots: Vec<ProviderSlot<P>>,
    policy: SelectionPolicy,
    retry: RetryConfig,
    /// Round-robin rotation index
    cursor: AtomicUsize,
}

impl<P: Provider + ?Sized> ProviderPool<P> {
    pub fn new(policy: SelectionPolicy, retry: RetryConfig) -> Self {
        Self {
            slots: Vec::new(),
            policy,
            retry,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Add a provider; names must be unique within the pool
    pub fn register(&mut self, provider: Arc<P>, priority: u32) -> Result<(), DispatchError> {
        let name = provider.name().to_string();
        if self.slots.iter().any(|slot| slot.provider.name() == name) {
            return Err(DispatchError::DuplicateProvider(name));
        }

        debug!(provider = %name, priority, "Registering provider");
        self.slots.push(ProviderSlot {
            stats: StatsCounter::new(&name),
            provider,
            priority,
        });
        self.slots.sort_by_key(|slot| slot.priority);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Provider names in priority order
    pub fn provider_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.provider.name().to_string())
            .collect()
    }

    pub fn provider(&self, name: &str) -> Option<Arc<P>> {
        self.slot(name).map(|slot| slot.provider.clone())
    }

    fn slot(&self, name: &str) -> Option<&ProviderSlot<P>> {
        self.slots.iter().find(|slot| slot.provider.name() == name)
    }

    /// Run `op` against the providers in policy order until one succeeds.
    ///
    /// `op` returns `Some` on success. An optional deadline bounds every
    /// attempt and every backoff sleep.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        deadline: Option<Instant>,
        op: F,
    ) -> Result<Delivered<T>, DispatchError>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if self.slots.is_empty() {
            warn!(operation, "No providers configured, skipping");
            return Err(DispatchError::NoProviders);
        }

        let order = self.policy.order(self.slots.len(), &self.cursor);
        let mut attempts = 0;

        for index in order {
            let slot = &self.slots[index];
            match self
                .run_slot(slot, operation, deadline, &op, &mut attempts)
                .await
            {
                SlotOutcome::Succeeded(value) => {
                    return Ok(Delivered {
                        provider: slot.provider.name().to_string(),
                        attempts,
                        value,
                    });
                }
                SlotOutcome::Exhausted => {
                    warn!(
                        operation,
                        provider = slot.provider.name(),
                        "Provider exhausted its attempts, failing over"
                    );
                }
                SlotOutcome::DeadlineExceeded => {
                    return Err(DispatchError::DeadlineExceeded { attempts });
                }
            }
        }

        error!(operation, attempts, "All providers failed");
        Err(DispatchError::AllProvidersFailed { attempts })
    }

    /// Run `op` against one named provider with the pool's retry policy
    pub async fn execute_on<T, F, Fut>(
        &self,
        name: &str,
        operation: &str,
        deadline: Option<Instant>,
        op: F,
    ) -> Result<Delivered<T>, DispatchError>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let slot = self
            .slot(name)
            .ok_or_else(|| DispatchError::UnknownProvider(name.to_string()))?;

        let mut attempts = 0;
        match self
            .run_slot(slot, operation, deadline, &op, &mut attempts)
            .await
        {
            SlotOutcome::Succeeded(value) => Ok(Delivered {
                provider: name.to_string(),
                attempts,
                value,
            }),
            SlotOutcome::Exhausted => Err(DispatchError::ProviderExhausted {
                provider: name.to_string(),
                attempts,
            }),
            SlotOutcome::DeadlineExceeded => Err(DispatchError::DeadlineExceeded { attempts }),
        }
    }

    async fn run_slot<T, F, Fut>(
        &self,
        slot: &ProviderSlot<P>,
        operation: &str,
        deadline: Option<Instant>,
        op: &F,
        attempts: &mut u32,
    ) -> SlotOutcome<T>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let name = slot.provider.name();
        let max_attempts = self.retry.attempts;
        let mut backoff = self.retry.backoff();

        for attempt in 1..=max_attempts {
            *attempts += 1;
            debug!(operation, provider = name, attempt, max_attempts, "Attempting provider");

            let outcome = match deadline {
                Some(deadline) => match timeout_at(deadline, op(slot.provider.clone())).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        slot.stats.record_failure();
                        warn!(operation, provider = name, attempt, "Deadline reached during attempt");
                        return SlotOutcome::DeadlineExceeded;
                    }
                },
                None => op(slot.provider.clone()).await,
            };

            match outcome {
                Some(value) => {
                    slot.stats.record_success();
                    if attempt > 1 {
                        info!(operation, provider = name, attempt, "Succeeded after retry");
                    }
                    return SlotOutcome::Succeeded(value);
                }
                None => {
                    slot.stats.record_failure();
                    warn!(operation, provider = name, attempt, max_attempts, "Attempt failed");
                }
            }

            if attempt < max_attempts {
                let Some(delay) = backoff.next_backoff() else {
                    break;
                };
                debug!(provider = name, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                if !sleep_within(delay, deadline).await {
                    warn!(operation, provider = name, "Deadline reached during backoff");
                    return SlotOutcome::DeadlineExceeded;
                }
            }
        }

        SlotOutcome::Exhausted
    }

    /// Probe every provider concurrently
    pub async fn test_all(&self) -> BTreeMap<String, bool> {
        let probes = self.slots.iter().map(|slot| async move {
            let healthy = slot.provider.test_connection().await;
            if !healthy {
                warn!(provider = slot.provider.name(), "Connection test failed");
            }
            (slot.provider.name().to_string(), healthy)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Stats snapshots in priority order
    pub fn stats(&self) -> Vec<ProviderStats> {
        self.slots.iter().map(|slot| slot.stats.snapshot()).collect()
    }

    pub fn stats_for(&self, name: &str) -> Option<ProviderStats> {
        self.slot(name).map(|slot| slot.stats.snapshot())
    }

    pub fn reset_stats(&self) {
        for slot in &self.slots {
            slot.stats.reset();
        }
    }
}

/// Sleep for `delay`, returning false if the deadline cuts it short
async fn sleep_within(delay: Duration, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => timeout_at(deadline, sleep(delay)).await.is_ok(),
        None => {
            sleep(delay).await;
            true
        }
    }
}
