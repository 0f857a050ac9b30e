//! Domain-level SMS intents

use crate::config::DEFAULT_VERIFICATION_TEMPLATE;
use crate::manager::SmsManager;
use crate::message::SmsMessage;
use provider_common::{ProviderStats, SendResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

pub struct SmsService {
    manager: Arc<SmsManager>,
    verification_template: String,
}

impl SmsService {
    pub fn new(manager: Arc<SmsManager>) -> Self {
        Self {
            manager,
            verification_template: DEFAULT_VERIFICATION_TEMPLATE.to_string(),
        }
    }

    pub fn with_verification_template(mut self, template: impl Into<String>) -> Self {
        self.verification_template = template.into();
        self
    }

    pub fn manager(&self) -> &Arc<SmsManager> {
        &self.manager
    }

    #[instrument(skip(self, code))]
    pub async fn send_verification_code(&self, phone: &str, code: &str) -> SendResult {
        let message = SmsMessage::new(phone, self.verification_template.as_str()).with_param("code", code);
        self.manager.send_sms(&message).await
    }

    #[instrument(skip(self, params))]
    pub async fn send_notification(
        &self,
        phones: &[String],
        template: &str,
        params: Vec<(String, String)>,
    ) -> SendResult {
        let message = SmsMessage {
            phone_numbers: phones.to_vec(),
            template_code: template.to_string(),
            template_params: params,
            sign_name: None,
        };
        self.manager.send_sms(&message).await
    }

    pub async fn test_connection(&self) -> BTreeMap<String, bool> {
        self.manager.test_all_connections().await
    }

    pub fn get_stats(&self) -> Vec<ProviderStats> {
        self.manager.all_stats()
    }
}
