use crate::order::{
    CreateOrderRequest, Order, OrderLookup, OrderUpdate, PaymentNotification, Refund, RefundRequest,
};
use async_trait::async_trait;
use provider_common::Provider;

/// A payment gateway
///
/// Same contract as message providers: vendor failures are logged and
/// reported as `None`/`false`, never as panics or errors.
#[async_trait]
pub trait PaymentProvider: Provider {
    /// Create a pending order at the gateway
    async fn create_order(&self, request: &CreateOrderRequest) -> Option<Order>;

    /// Current gateway view of an order; `None` when the gateway could not
    /// give a definite answer
    async fn query_order(&self, order_id: &str) -> Option<OrderLookup>;

    async fn refund(&self, request: &RefundRequest) -> Option<Refund>;

    /// Whether an inbound callback carries a valid gateway signature
    fn verify_notification(&self, notification: &PaymentNotification) -> bool;

    /// Extract the order update from a callback, without verifying it
    fn parse_notification(&self, notification: &PaymentNotification) -> Option<OrderUpdate>;
}
