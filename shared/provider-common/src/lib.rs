//! Shared provider contract and failover orchestration for HR communication
//! and payment providers
//!
//! Every message or payment kind (email, SMS, payments) plugs its vendor
//! implementations into the same pool: ordered selection, per-provider retry
//! with linear backoff, fall-through to the next provider and per-provider
//! delivery statistics.

pub mod error;
pub mod manager;
pub mod policy;
pub mod pool;
pub mod provider;
pub mod retry;
pub mod settings;
pub mod signing;
pub mod stats;

#[cfg(test)]
pub mod test_utilities;

// Re-export commonly used types
pub use error::{DispatchError, ProviderError};
pub use manager::{MessageManager, SendResult};
pub use policy::SelectionPolicy;
pub use pool::{Delivered, ProviderPool};
pub use provider::{enabled_in_priority_order, MessageProvider, Provider, ProviderDescriptor};
pub use retry::{LinearBackoff, RetryConfig};
pub use settings::ManagerSettings;
pub use stats::{ProviderStats, StatsCounter};
