//! Payment gateways for the HR application
//!
//! Alipay and WeChat Pay behind one `PaymentProvider` contract. The
//! `PaymentManager` adds retry and failover on top of the shared provider
//! pool and tracks every order it sees through the
//! `pending -> paid -> refunded` lifecycle.

pub mod alipay;
pub mod codec;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod order;
pub mod provider;
pub mod wechat;

pub use crate::config::{PaymentProviderConfig, PaymentSettings};
pub use alipay::{AlipayConfig, AlipayProvider};
pub use error::PaymentError;
pub use ledger::{OrderLedger, RefundClaim};
pub use manager::PaymentManager;
pub use order::{
    CreateOrderRequest, Order, OrderLookup, OrderStatus, OrderUpdate, PaymentNotification, Refund,
    RefundRequest, RefundStatus,
};
pub use provider::PaymentProvider;
pub use wechat::{WechatPayConfig, WechatPayProvider};
