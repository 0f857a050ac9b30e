//! Payment orders, refunds and the order status state machine

use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Failed | OrderStatus::Refunded | OrderStatus::Cancelled
        )
    }

    /// Staying in the same state is always allowed
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        *self == next
            || matches!(
                (self, next),
                (Pending, Paid) | (Pending, Failed) | (Pending, Cancelled) | (Paid, Refunded)
            )
    }

    pub fn transition_to(&self, next: OrderStatus) -> Result<OrderStatus, PaymentError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PaymentError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub amount: Decimal,
    pub status: OrderStatus,
    /// Content to render as a scannable QR code
    pub qr_code: Option<String>,
    pub payment_url: Option<String>,
    /// Gateway-side transaction number, known once paid
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// Provider that created the order
    pub provider: String,
}

impl Order {
    pub fn pending(request: &CreateOrderRequest, provider: &str) -> Self {
        Self {
            order_id: request.order_id.clone(),
            amount: request.amount,
            status: OrderStatus::Pending,
            qr_code: None,
            payment_url: None,
            transaction_id: None,
            paid_at: None,
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
            provider: provider.to_string(),
        }
    }

    /// Apply a gateway status report, enforcing the state machine
    pub fn apply(&mut self, update: &OrderUpdate) -> Result<(), PaymentError> {
        self.status = self.status.transition_to(update.status)?;
        if update.transaction_id.is_some() {
            self.transaction_id = update.transaction_id.clone();
        }
        if update.paid_at.is_some() {
            self.paid_at = update.paid_at;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Success,
    Failed,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub refund_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub status: RefundStatus,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_in_minutes: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CreateOrderRequest {
    /// Request with a freshly generated order id
    pub fn new(amount: Decimal, subject: impl Into<String>) -> Self {
        Self {
            order_id: Uuid::new_v4().simple().to_string(),
            amount,
            subject: subject.into(),
            description: None,
            expires_in_minutes: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.order_id.is_empty() || self.order_id.len() > 32 {
            return Err(PaymentError::InvalidRequest(
                "order_id must be 1 to 32 characters".to_string(),
            ));
        }
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        if self.amount.scale() > 2 && self.amount.round_dp(2) != self.amount {
            return Err(PaymentError::InvalidRequest(
                "amount must have at most two decimal places".to_string(),
            ));
        }
        if self.subject.trim().is_empty() {
            return Err(PaymentError::InvalidRequest("subject is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_id: String,
    pub refund_id: String,
    pub amount: Decimal,
    /// Order total, required by some gateways; filled in from the ledger
    #[serde(default)]
    pub order_amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RefundRequest {
    pub fn new(order_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            refund_id: Uuid::new_v4().simple().to_string(),
            amount,
            order_amount: None,
            reason: None,
        }
    }
}

/// Raw inbound gateway callback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl PaymentNotification {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }
}

/// Gateway view of an order, from a query or a verified notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: OrderStatus,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Gateway answer to an order query
#[derive(Debug, Clone, PartialEq)]
pub enum OrderLookup {
    Found(OrderUpdate),
    /// The gateway has no record of the order
    NotFound,
}
