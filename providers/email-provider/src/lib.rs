//! Email providers for the communications core
//!
//! SMTP (lettre) and SendGrid behind the shared provider contract, an
//! `EmailManager` that fails over between them and an `EmailService` facade
//! for alert, notification and verification emails.

pub mod config;
pub mod formatter;
pub mod manager;
pub mod message;
pub mod sendgrid;
pub mod service;
pub mod smtp;

pub use crate::config::{EmailProviderConfig, EmailSettings};
pub use formatter::{AlertSeverity, EmailFormatter, RenderedEmail};
pub use manager::EmailManager;
pub use message::{EmailAttachment, EmailMessage, EmailTemplate};
pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use service::EmailService;
pub use smtp::{SmtpConfig, SmtpProvider};
