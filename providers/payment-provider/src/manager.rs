//! Payment manager: gateway failover plus order lifecycle tracking

use crate::config::PaymentSettings;
use crate::error::PaymentError;
use crate::ledger::OrderLedger;
use crate::order::{
    CreateOrderRequest, Order, OrderLookup, OrderStatus, PaymentNotification, Refund,
    RefundRequest, RefundStatus,
};
use crate::provider::PaymentProvider;
use provider_common::{DispatchError, ProviderPool, ProviderStats, RetryConfig, SelectionPolicy};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct PaymentManager {
    pool: ProviderPool<dyn PaymentProvider>,
    ledger: OrderLedger,
}

impl PaymentManager {
    pub fn new(policy: SelectionPolicy, retry: RetryConfig) -> Self {
        Self {
            pool: ProviderPool::new(policy, retry),
            ledger: OrderLedger::new(),
        }
    }

    /// Replace the order ledger, e.g. one with different retention limits
    pub fn with_ledger(mut self, ledger: OrderLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn from_settings(settings: &PaymentSettings) -> Result<Self, PaymentError> {
        let mut manager = Self::new(settings.manager.strategy, settings.manager.retry_config())
            .with_ledger(settings.ledger());

        for descriptor in settings.providers() {
            let provider = descriptor.config.build()?;
            manager.register(provider, descriptor.priority)?;
        }

        info!(
            providers = ?manager.provider_names(),
            strategy = %settings.manager.strategy,
            "Payment manager initialized"
        );
        Ok(manager)
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn PaymentProvider>,
        priority: u32,
    ) -> Result<(), PaymentError> {
        Ok(self.pool.register(provider, priority)?)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.pool.provider_names()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Order as last recorded by this manager
    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.ledger.get(order_id)
    }

    /// Create a pending order with the named gateway
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_order(
        &self,
        provider: &str,
        request: &CreateOrderRequest,
    ) -> Result<Order, PaymentError> {
        request.validate()?;

        let delivered = self
            .pool
            .execute_on(provider, "create_order", None, |gateway| async move {
                gateway.create_order(request).await
            })
            .await?;

        self.record_created(delivered.value, delivered.attempts)
    }

    /// Create a pending order with the first gateway that accepts it
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_order_any(&self, request: &CreateOrderRequest) -> Result<Order, PaymentError> {
        request.validate()?;

        let delivered = self
            .pool
            .execute("create_order", None, |gateway| async move {
                gateway.create_order(request).await
            })
            .await?;

        self.record_created(delivered.value, delivered.attempts)
    }

    fn record_created(&self, order: Order, attempts: u32) -> Result<Order, PaymentError> {
        if order.status != OrderStatus::Pending {
            return Err(PaymentError::InvalidTransition {
                from: OrderStatus::Pending,
                to: order.status,
            });
        }
        info!(
            order_id = %order.order_id,
            provider = %order.provider,
            attempts,
            "Payment order created"
        );
        self.ledger.insert(order.clone());
        Ok(order)
    }

    /// Ask the gateway for the current state and apply it to the ledger.
    ///
    /// A gateway report the state machine rejects is logged and the recorded
    /// order is returned unchanged. An order the gateway does not know is
    /// `OrderNotFound`.
    #[instrument(skip(self))]
    pub async fn query_order(&self, provider: &str, order_id: &str) -> Result<Order, PaymentError> {
        let delivered = self
            .pool
            .execute_on(provider, "query_order", None, |gateway| async move {
                gateway.query_order(order_id).await
            })
            .await?;

        let update = match delivered.value {
            OrderLookup::Found(update) => update,
            OrderLookup::NotFound => {
                info!(order_id, provider, "Gateway has no record of order");
                return Err(PaymentError::OrderNotFound(order_id.to_string()));
            }
        };

        match self.ledger.apply(&update, provider) {
            Ok(order) => Ok(order),
            Err(PaymentError::InvalidTransition { from, to }) => {
                warn!(order_id, %from, %to, "Ignoring gateway status that would regress the order");
                self.ledger
                    .get(order_id)
                    .ok_or_else(|| PaymentError::OrderNotFound(order_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Refund a paid order. Orders in any other state are rejected before
    /// the gateway is contacted, as is a second refund of an order whose
    /// refund is still in flight.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn refund(&self, provider: &str, request: &RefundRequest) -> Result<Refund, PaymentError> {
        if self.ledger.get(&request.order_id).is_none() {
            self.query_order(provider, &request.order_id).await?;
        }

        let claim = self.ledger.claim_refund(&request.order_id)?;
        let order = claim.order();
        if request.amount <= Decimal::ZERO
            || (order.amount > Decimal::ZERO && request.amount > order.amount)
        {
            return Err(PaymentError::InvalidRequest(format!(
                "refund amount {} is outside 0..={}",
                request.amount, order.amount
            )));
        }

        let mut request = request.clone();
        request.order_amount.get_or_insert(order.amount);
        let request = &request;

        let delivered = self
            .pool
            .execute_on(provider, "refund", None, |gateway| async move {
                gateway.refund(request).await
            })
            .await?;

        let refund = delivered.value;
        match refund.status {
            RefundStatus::Success => {
                self.ledger.mark_refunded(&request.order_id)?;
                info!(refund_id = %refund.refund_id, amount = %refund.amount, "Order refunded");
            }
            RefundStatus::Processing => {
                info!(refund_id = %refund.refund_id, "Refund accepted, awaiting settlement");
            }
            RefundStatus::Failed => {
                warn!(refund_id = %refund.refund_id, "Gateway reported refund failure");
            }
        }
        drop(claim);
        Ok(refund)
    }

    /// Whether a callback carries a valid signature from the named gateway
    pub fn verify_notification(&self, provider: &str, notification: &PaymentNotification) -> bool {
        match self.pool.provider(provider) {
            Some(gateway) => gateway.verify_notification(notification),
            None => {
                warn!(provider, "Notification for unknown payment provider");
                false
            }
        }
    }

    /// Verify a callback and apply the reported status. Unverified
    /// callbacks never change an order.
    #[instrument(skip(self, notification))]
    pub fn handle_notification(
        &self,
        provider: &str,
        notification: &PaymentNotification,
    ) -> Result<Order, PaymentError> {
        let gateway = self
            .pool
            .provider(provider)
            .ok_or_else(|| DispatchError::UnknownProvider(provider.to_string()))?;

        if !gateway.verify_notification(notification) {
            warn!(provider, "Rejected untrusted payment notification");
            return Err(PaymentError::UntrustedNotification);
        }

        let update = gateway.parse_notification(notification).ok_or_else(|| {
            PaymentError::MalformedNotification("missing order id or status".to_string())
        })?;

        let order = self.ledger.apply(&update, provider)?;
        info!(order_id = %order.order_id, status = %order.status, "Payment notification applied");
        Ok(order)
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

