//! SMS providers for the communications core
//!
//! Aliyun and Tencent Cloud SMS behind the shared provider contract, with an
//! `SmsManager` failing over between them and an `SmsService` facade for
//! verification codes and templated notifications.

pub mod aliyun;
pub mod config;
pub mod manager;
pub mod message;
pub mod service;
pub mod tencent;

pub use crate::config::{SmsProviderConfig, SmsSettings};
pub use aliyun::{AliyunSmsConfig, AliyunSmsProvider};
pub use manager::SmsManager;
pub use message::SmsMessage;
pub use service::SmsService;
pub use tencent::{TencentSmsConfig, TencentSmsProvider};
