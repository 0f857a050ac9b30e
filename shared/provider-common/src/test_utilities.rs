//! Test doubles for pool and manager tests

use crate::provider::{MessageProvider, Provider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Provider whose outcomes are played back from a script.
///
/// Once the script runs dry every further attempt returns `fallback`.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn always(name: &str, outcome: bool) -> Arc<Self> {
        Self::scripted(name, Vec::new(), outcome)
    }

    pub fn scripted(name: &str, script: Vec<bool>, fallback: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
            delay: None,
        })
    }

    /// Provider that sleeps for `delay` before failing every attempt
    pub fn hanging(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: false,
            calls: AtomicU32::new(0),
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn attempt(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or(self.fallback)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> bool {
        self.fallback
    }
}

#[async_trait]
impl MessageProvider<String> for ScriptedProvider {
    async fn send(&self, _message: &String) -> bool {
        self.attempt().await
    }
}
