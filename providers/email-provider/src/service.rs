//! Domain-level email intents on top of the email manager

use crate::formatter::{AlertSeverity, EmailFormatter, RenderedEmail};
use crate::manager::EmailManager;
use crate::message::EmailMessage;
use provider_common::{ProviderStats, SendResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct EmailService {
    manager: Arc<EmailManager>,
    formatter: EmailFormatter,
}

impl EmailService {
    pub fn new(manager: Arc<EmailManager>) -> Self {
        Self {
            manager,
            formatter: EmailFormatter::new(),
        }
    }

    pub fn manager(&self) -> &Arc<EmailManager> {
        &self.manager
    }

    #[instrument(skip(self, message))]
    pub async fn send_alert_email(
        &self,
        to: &str,
        title: &str,
        message: &str,
        severity: AlertSeverity,
    ) -> SendResult {
        let rendered = self.formatter.alert(title, message, severity);
        self.deliver(to, rendered).await
    }

    #[instrument(skip(self, html))]
    pub async fn send_notification_email(&self, to: &str, subject: &str, html: &str) -> SendResult {
        let rendered = self.formatter.notification(subject, html);
        self.deliver(to, rendered).await
    }

    #[instrument(skip(self, code))]
    pub async fn send_verification_code(&self, to: &str, code: &str, ttl_minutes: u32) -> SendResult {
        let rendered = self.formatter.verification(code, ttl_minutes);
        self.deliver(to, rendered).await
    }

    pub async fn test_connection(&self) -> BTreeMap<String, bool> {
        self.manager.test_all_connections().await
    }

    pub fn get_stats(&self) -> Vec<ProviderStats> {
        self.manager.all_stats()
    }

    async fn deliver(&self, to: &str, rendered: RenderedEmail) -> SendResult {
        debug!(subject = %rendered.subject, "Sending rendered email");
        let message = EmailMessage::new(to, rendered.subject)
            .with_html(rendered.html)
            .with_text(rendered.text);
        self.manager.send_email(&message).await
    }
}
