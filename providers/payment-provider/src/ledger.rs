//! In-process record of orders seen by the payment manager

use crate::error::PaymentError;
use crate::order::{Order, OrderStatus, OrderUpdate};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::debug;

pub const DEFAULT_RETENTION_MINUTES: i64 = 24 * 60;
pub const DEFAULT_CAPACITY: usize = 10_000;
const SWEEP_INTERVAL_SECS: i64 = 60;

struct Record {
    order: Order,
    updated_at: DateTime<Utc>,
    /// Insertion order, oldest first when over capacity
    seq: u64,
}

/// Orders keyed by merchant order id.
///
/// Every status change goes through the order state machine; a rejected
/// transition leaves the stored order untouched.
///
/// The ledger is a bounded cache of gateway state. Terminal orders are
/// dropped once untouched for the retention period, and the oldest orders
/// are dropped when the ledger grows past its capacity. Orders with a refund
/// in flight are never evicted.
pub struct OrderLedger {
    orders: DashMap<String, Record>,
    refunding: DashSet<String>,
    retention: Duration,
    capacity: usize,
    seq: AtomicU64,
    last_sweep: AtomicI64,
}

impl Default for OrderLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::with_limits(Duration::minutes(DEFAULT_RETENTION_MINUTES), DEFAULT_CAPACITY)
    }

    pub fn with_limits(retention: Duration, capacity: usize) -> Self {
        Self {
            orders: DashMap::new(),
            refunding: DashSet::new(),
            retention,
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
            last_sweep: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn insert(&self, order: Order) {
        let record = self.record(order);
        self.orders.insert(record.order.order_id.clone(), record);
        self.maybe_sweep();
    }

    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|record| record.order.clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Apply a gateway report, recording orders created outside this process
    pub fn apply(&self, update: &OrderUpdate, provider: &str) -> Result<Order, PaymentError> {
        let order = match self.orders.entry(update.order_id.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.order.apply(update)?;
                record.updated_at = Utc::now();
                return Ok(record.order.clone());
            }
            Entry::Vacant(entry) => {
                let order = observed(update, provider);
                entry.insert(self.record(order.clone()));
                order
            }
        };
        self.maybe_sweep();
        Ok(order)
    }

    /// Reserve a paid order for refund. The claim is released when dropped;
    /// while it is held no other refund of the same order can start.
    pub fn claim_refund(&self, order_id: &str) -> Result<RefundClaim<'_>, PaymentError> {
        let record = self
            .orders
            .get(order_id)
            .ok_or_else(|| PaymentError::OrderNotFound(order_id.to_string()))?;

        if record.order.status != OrderStatus::Paid {
            return Err(PaymentError::NotRefundable {
                order_id: order_id.to_string(),
                status: record.order.status,
            });
        }
        // Taken while the record is read-locked, so a concurrent
        // mark_refunded cannot slip in between the check and the claim.
        if !self.refunding.insert(order_id.to_string()) {
            return Err(PaymentError::RefundInProgress(order_id.to_string()));
        }

        Ok(RefundClaim {
            ledger: self,
            order: record.order.clone(),
        })
    }

    /// Move a paid order to refunded. Any other state, refunded included,
    /// is rejected.
    pub fn mark_refunded(&self, order_id: &str) -> Result<Order, PaymentError> {
        let mut record = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| PaymentError::OrderNotFound(order_id.to_string()))?;

        if record.order.status != OrderStatus::Paid {
            return Err(PaymentError::InvalidTransition {
                from: record.order.status,
                to: OrderStatus::Refunded,
            });
        }
        record.order.status = OrderStatus::Refunded;
        record.updated_at = Utc::now();
        Ok(record.order.clone())
    }

    /// Drop terminal orders untouched since `now - retention`, then the
    /// oldest orders beyond capacity. Returns how many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.orders.len();

        self.orders.retain(|order_id, record| {
            !record.order.status.is_terminal()
                || now - record.updated_at < self.retention
                || self.refunding.contains(order_id)
        });

        let excess = self.orders.len().saturating_sub(self.capacity);
        if excess > 0 {
            let mut oldest: Vec<(u64, String)> = self
                .orders
                .iter()
                .filter(|record| !self.refunding.contains(record.key()))
                .map(|record| (record.seq, record.key().clone()))
                .collect();
            oldest.sort_unstable();
            for (_, order_id) in oldest.into_iter().take(excess) {
                self.orders.remove(&order_id);
            }
        }

        let removed = before.saturating_sub(self.orders.len());
        if removed > 0 {
            debug!(removed, remaining = self.orders.len(), "Evicted orders from ledger");
        }
        removed
    }

    fn record(&self, order: Order) -> Record {
        Record {
            order,
            updated_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Sweep when over capacity or at most once per interval
    fn maybe_sweep(&self) {
        let now = Utc::now();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if self.orders.len() > self.capacity || now.timestamp() - last >= SWEEP_INTERVAL_SECS {
            self.last_sweep.store(now.timestamp(), Ordering::Relaxed);
            self.evict_expired(now);
        }
    }
}

/// Exclusive right to refund one order, held for the gateway call
pub struct RefundClaim<'a> {
    ledger: &'a OrderLedger,
    order: Order,
}

impl RefundClaim<'_> {
    /// The order as it stood when the claim was taken
    pub fn order(&self) -> &Order {
        &self.order
    }
}

impl Drop for RefundClaim<'_> {
    fn drop(&mut self) {
        self.ledger.refunding.remove(&self.order.order_id);
    }
}

fn observed(update: &OrderUpdate, provider: &str) -> Order {
    Order {
        order_id: update.order_id.clone(),
        amount: update.amount.unwrap_or(Decimal::ZERO),
        status: update.status,
        qr_code: None,
        payment_url: None,
        transaction_id: update.transaction_id.clone(),
        paid_at: update.paid_at,
        metadata: BTreeMap::new(),
        created_at: Utc::now(),
        provider: provider.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::CreateOrderRequest;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn pending(ledger: &OrderLedger, order_id: &str) {
        let mut request = CreateOrderRequest::new(Decimal::from_str("19.90").unwrap(), "Seat");
        request.order_id = order_id.to_string();
        ledger.insert(Order::pending(&request, "alipay"));
    }

    fn update(order_id: &str, status: OrderStatus) -> OrderUpdate {
        OrderUpdate {
            order_id: order_id.to_string(),
            status,
            transaction_id: Some("TX1".to_string()),
            amount: None,
            paid_at: None,
        }
    }

    #[test]
    fn test_apply_advances_known_order() {
        let ledger = OrderLedger::new();
        pending(&ledger, "A1");

        let order = ledger.apply(&update("A1", OrderStatus::Paid), "alipay").unwrap();

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("TX1"));
        assert_eq!(ledger.get("A1").unwrap().status, OrderStatus::Paid);
    }

    #[test]
    fn test_apply_records_unknown_order() {
        let ledger = OrderLedger::new();
        let mut report = update("B1", OrderStatus::Paid);
        report.amount = Some(Decimal::from_str("5.00").unwrap());

        let order = ledger.apply(&report, "wechat").unwrap();

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.provider, "wechat");
        assert_eq!(order.amount, Decimal::from_str("5.00").unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_terminal_order_is_not_reopened() {
        let ledger = OrderLedger::new();
        pending(&ledger, "C1");
        ledger.apply(&update("C1", OrderStatus::Cancelled), "alipay").unwrap();

        let result = ledger.apply(&update("C1", OrderStatus::Paid), "alipay");

        assert!(matches!(result, Err(PaymentError::InvalidTransition { .. })));
        assert_eq!(ledger.get("C1").unwrap().status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_mark_refunded_requires_paid() {
        let ledger = OrderLedger::new();
        pending(&ledger, "D1");

        assert!(ledger.mark_refunded("D1").is_err());
        assert_eq!(ledger.get("D1").unwrap().status, OrderStatus::Pending);

        ledger.apply(&update("D1", OrderStatus::Paid), "alipay").unwrap();
        assert_eq!(ledger.mark_refunded("D1").unwrap().status, OrderStatus::Refunded);
        assert!(matches!(
            ledger.mark_refunded("missing"),
            Err(PaymentError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_mark_refunded_twice_is_rejected() {
        let ledger = OrderLedger::new();
        pending(&ledger, "D2");
        ledger.apply(&update("D2", OrderStatus::Paid), "alipay").unwrap();
        ledger.mark_refunded("D2").unwrap();

        let result = ledger.mark_refunded("D2");

        assert!(matches!(
            result,
            Err(PaymentError::InvalidTransition {
                from: OrderStatus::Refunded,
                to: OrderStatus::Refunded
            })
        ));
    }

    #[test]
    fn test_refund_claim_is_exclusive_until_dropped() {
        let ledger = OrderLedger::new();
        pending(&ledger, "E1");
        ledger.apply(&update("E1", OrderStatus::Paid), "alipay").unwrap();

        let claim = ledger.claim_refund("E1").unwrap();
        assert_eq!(claim.order().status, OrderStatus::Paid);
        assert!(matches!(
            ledger.claim_refund("E1"),
            Err(PaymentError::RefundInProgress(id)) if id == "E1"
        ));

        drop(claim);
        assert!(ledger.claim_refund("E1").is_ok());
    }

    #[test]
    fn test_refund_claim_requires_paid() {
        let ledger = OrderLedger::new();
        pending(&ledger, "E2");

        assert!(matches!(
            ledger.claim_refund("E2"),
            Err(PaymentError::NotRefundable { status: OrderStatus::Pending, .. })
        ));
        assert!(matches!(
            ledger.claim_refund("missing"),
            Err(PaymentError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_terminal_orders_expire_after_retention() {
        let ledger = OrderLedger::with_limits(Duration::minutes(30), 100);
        pending(&ledger, "F1");
        pending(&ledger, "F2");
        pending(&ledger, "F3");
        ledger.apply(&update("F2", OrderStatus::Cancelled), "alipay").unwrap();
        ledger.apply(&update("F3", OrderStatus::Paid), "alipay").unwrap();

        assert_eq!(ledger.evict_expired(Utc::now()), 0);

        let removed = ledger.evict_expired(Utc::now() + Duration::minutes(31));

        assert_eq!(removed, 1);
        assert!(ledger.get("F2").is_none());
        assert_eq!(ledger.get("F1").unwrap().status, OrderStatus::Pending);
        assert_eq!(ledger.get("F3").unwrap().status, OrderStatus::Paid);
    }

    #[test]
    fn test_capacity_drops_oldest_orders() {
        let ledger = OrderLedger::with_limits(Duration::minutes(30), 2);
        pending(&ledger, "G1");
        pending(&ledger, "G2");
        pending(&ledger, "G3");

        assert_eq!(ledger.len(), 2);
        assert!(ledger.get("G1").is_none());
        assert!(ledger.get("G2").is_some());
        assert!(ledger.get("G3").is_some());
    }

    #[test]
    fn test_eviction_spares_order_being_refunded() {
        let ledger = OrderLedger::with_limits(Duration::minutes(30), 2);
        pending(&ledger, "H1");
        ledger.apply(&update("H1", OrderStatus::Paid), "alipay").unwrap();
        let _claim = ledger.claim_refund("H1").unwrap();

        pending(&ledger, "H2");
        pending(&ledger, "H3");

        assert_eq!(ledger.len(), 2);
        assert!(ledger.get("H1").is_some());
        assert!(ledger.get("H2").is_none());
        assert!(ledger.get("H3").is_some());
    }
}
