//! Per-provider delivery statistics
//!
//! Counters are created together with the provider's pool slot and live for
//! the process lifetime. They only move forward until an explicit reset.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of one provider's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub provider: String,
    pub sent: u64,
    pub failed: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl ProviderStats {
    /// Total attempts recorded against the provider
    pub fn attempts(&self) -> u64 {
        self.sent + self.failed
    }
}

/// Thread-safe counters for one provider
#[derive(Debug)]
pub struct StatsCounter {
    provider: String,
    sent: AtomicU64,
    failed: AtomicU64,
    last_sent_at: RwLock<Option<DateTime<Utc>>>,
}

impl StatsCounter {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_sent_at: RwLock::new(None),
        }
    }

    pub fn record_success(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        *self.last_sent_at.write() = Some(Utc::now());
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProviderStats {
        ProviderStats {
            provider: self.provider.clone(),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_sent_at: *self.last_sent_at.read(),
        }
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        *self.last_sent_at.write() = None;
    }
}
