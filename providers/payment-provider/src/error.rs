use crate::order::OrderStatus;
use provider_common::{DispatchError, ProviderError};
use thiserror::Error;

/// Errors surfaced by the payment manager
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid order transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("order {order_id} cannot be refunded while {status}")]
    NotRefundable {
        order_id: String,
        status: OrderStatus,
    },

    #[error("refund already in progress for order {0}")]
    RefundInProgress(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("notification signature verification failed")]
    UntrustedNotification,

    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl PaymentError {
    pub fn error_code(&self) -> &'static str {
        match self {
            PaymentError::InvalidTransition { .. } => "INVALID_TRANSITION",
            PaymentError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            PaymentError::NotRefundable { .. } => "NOT_REFUNDABLE",
            PaymentError::RefundInProgress(_) => "REFUND_IN_PROGRESS",
            PaymentError::InvalidRequest(_) => "INVALID_REQUEST",
            PaymentError::UntrustedNotification => "UNTRUSTED_NOTIFICATION",
            PaymentError::MalformedNotification(_) => "MALFORMED_NOTIFICATION",
            PaymentError::Dispatch(_) => "DISPATCH_FAILED",
            PaymentError::Provider(e) => e.error_code(),
        }
    }
}
