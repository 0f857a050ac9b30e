use provider_common::ProviderError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One templated SMS, possibly to several numbers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub phone_numbers: Vec<String>,
    /// Logical template name, mapped to a vendor template id per provider
    pub template_code: String,
    /// Template parameters in template order
    #[serde(default)]
    pub template_params: Vec<(String, String)>,
    /// Overrides the provider's configured signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_name: Option<String>,
}

impl SmsMessage {
    pub fn new(phone: impl Into<String>, template_code: impl Into<String>) -> Self {
        Self {
            phone_numbers: vec![phone.into()],
            template_code: template_code.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_params.push((key.into(), value.into()));
        self
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.phone_numbers.is_empty() {
            return Err(ProviderError::MalformedPayload(
                "At least one phone number is required".to_string(),
            ));
        }

        let phone_regex = Regex::new(r"^\+?[0-9]{6,15}$")
            .map_err(|_| ProviderError::MalformedPayload("Regex compilation failed".to_string()))?;

        if let Some(invalid) = self.phone_numbers.iter().find(|p| !phone_regex.is_match(p)) {
            return Err(ProviderError::MalformedPayload(format!(
                "Invalid phone number: {}",
                invalid
            )));
        }

        if self.template_code.trim().is_empty() {
            return Err(ProviderError::MalformedPayload(
                "Template code is required".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("13800138000", true)]
    #[case("+8613800138000", true)]
    #[case("138-0013-8000", false)]
    #[case("12345", false)]
    fn test_phone_validation(#[case] phone: &str, #[case] valid: bool) {
        let message = SmsMessage::new(phone, "verification");
        assert_eq!(message.validate().is_ok(), valid);
    }

    #[test]
    fn test_template_required() {
        let message = SmsMessage::new("13800138000", " ");
        assert!(message.validate().is_err());
    }

    #[test]
    fn test_params_keep_order() {
        let message = SmsMessage::new("13800138000", "leave")
            .with_param("name", "Alice")
            .with_param("days", "3");
        assert_eq!(message.template_params[0].0, "name");
        assert_eq!(message.template_params[1].0, "days");
    }
}
