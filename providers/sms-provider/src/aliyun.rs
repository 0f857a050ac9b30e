//! Aliyun Dysms client (RPC-style API, HMAC-SHA1 signature)

use crate::message::SmsMessage;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use provider_common::signing::{canonical_query, hmac_sha1, percent_encode};
use provider_common::{MessageProvider, Provider, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const ALIYUN_ENDPOINT: &str = "https://dysmsapi.aliyuncs.com";
const API_VERSION: &str = "2017-05-25";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliyunSmsConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub sign_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Logical template name to Aliyun template code
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "cn-hangzhou".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliyunResponse {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    biz_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Sign the parameters per the RPC signature v1.0 scheme.
///
/// The string to sign is `GET&%2F&` followed by the percent-encoded,
/// key-sorted, percent-encoded query; the key is the secret plus `&`.
pub fn sign(secret: &str, params: &BTreeMap<String, String>) -> Result<String, ProviderError> {
    let string_to_sign = format!(
        "GET&{}&{}",
        percent_encode("/"),
        percent_encode(&canonical_query(params, true))
    );
    let mac = hmac_sha1(format!("{}&", secret).as_bytes(), string_to_sign.as_bytes())?;
    Ok(BASE64.encode(mac))
}

pub struct AliyunSmsProvider {
    client: Client,
    config: AliyunSmsConfig,
    endpoint: String,
}

impl AliyunSmsProvider {
    pub fn new(config: AliyunSmsConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
            })?;

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| ALIYUN_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    fn common_params(&self, action: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("AccessKeyId".to_string(), self.config.access_key_id.clone());
        params.insert("Action".to_string(), action.to_string());
        params.insert("Format".to_string(), "JSON".to_string());
        params.insert("RegionId".to_string(), self.config.region.clone());
        params.insert("SignatureMethod".to_string(), "HMAC-SHA1".to_string());
        params.insert("SignatureNonce".to_string(), Uuid::new_v4().to_string());
        params.insert("SignatureVersion".to_string(), "1.0".to_string());
        params.insert(
            "Timestamp".to_string(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        params.insert("Version".to_string(), API_VERSION.to_string());
        params
    }

    pub fn send_params(&self, message: &SmsMessage) -> Result<BTreeMap<String, String>, ProviderError> {
        let template_param: serde_json::Map<String, serde_json::Value> = message
            .template_params
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let template_param = serde_json::to_string(&template_param)
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;

        let template_code = self
            .config
            .templates
            .get(&message.template_code)
            .unwrap_or(&message.template_code)
            .clone();

        let mut params = self.common_params("SendSms");
        params.insert("PhoneNumbers".to_string(), message.phone_numbers.join(","));
        params.insert(
            "SignName".to_string(),
            message
                .sign_name
                .clone()
                .unwrap_or_else(|| self.config.sign_name.clone()),
        );
        params.insert("TemplateCode".to_string(), template_code);
        params.insert("TemplateParam".to_string(), template_param);
        Ok(params)
    }

    async fn call(&self, params: BTreeMap<String, String>) -> Result<AliyunResponse, ProviderError> {
        let signature = sign(&self.config.access_key_secret, &params)?;
        let url = format!(
            "{}/?Signature={}&{}",
            self.endpoint,
            percent_encode(&signature),
            canonical_query(&params, true)
        );

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // Business errors come back with a non-2xx status and a JSON body
        match serde_json::from_str::<AliyunResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ProviderError::from_status(status.as_u16())),
            Err(e) => Err(ProviderError::MalformedResponse(e.to_string())),
        }
    }

    pub async fn deliver(&self, message: &SmsMessage) -> Result<String, ProviderError> {
        message.validate()?;
        let response = self.call(self.send_params(message)?).await?;

        if response.code != "OK" {
            return Err(ProviderError::Rejected {
                code: response.code,
                message: response.message,
            });
        }

        let biz_id = response.biz_id.unwrap_or_default();
        debug!(
            biz_id = %biz_id,
            request_id = ?response.request_id,
            "Aliyun accepted SMS"
        );
        Ok(biz_id)
    }
}

#[async_trait]
impl Provider for AliyunSmsProvider {
    fn name(&self) -> &str {
        "aliyun"
    }

    async fn test_connection(&self) -> bool {
        let mut params = self.common_params("QuerySmsSignList");
        params.insert("PageIndex".to_string(), "1".to_string());
        params.insert("PageSize".to_string(), "1".to_string());

        match self.call(params).await {
            Ok(response) if response.code == "OK" => true,
            Ok(response) => {
                warn!(code = %response.code, message = %response.message, "Aliyun connection test rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Aliyun connection test failed");
                false
            }
        }
    }
}

#[async_trait]
impl MessageProvider<SmsMessage> for AliyunSmsProvider {
    async fn send(&self, message: &SmsMessage) -> bool {
        match self.deliver(message).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    provider = "aliyun",
                    error_code = e.error_code(),
                    error = %e,
                    "Failed to send SMS"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider() -> AliyunSmsProvider {
        let mut templates = BTreeMap::new();
        templates.insert("verification".to_string(), "SMS_71390007".to_string());
        AliyunSmsProvider::new(AliyunSmsConfig {
            access_key_id: "testId".to_string(),
            access_key_secret: "testSecret".to_string(),
            sign_name: "HR".to_string(),
            region: default_region(),
            endpoint: None,
            templates,
            timeout_secs: 10,
        })
        .unwrap()
    }

    #[test]
    fn test_signature_over_encoded_query() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "x y".to_string());
        params.insert("a".to_string(), "1".to_string());

        let expected = BASE64.encode(
            hmac_sha1(b"secret&", b"GET&%2F&a%3D1%26b%3Dx%2520y").unwrap(),
        );
        assert_eq!(sign("secret", &params).unwrap(), expected);
    }

    #[test]
    fn test_send_params() {
        let message = SmsMessage::new("13800138000", "verification").with_param("code", "123456");

        let params = provider().send_params(&message).unwrap();

        assert_eq!(params["Action"], "SendSms");
        assert_eq!(params["PhoneNumbers"], "13800138000");
        assert_eq!(params["SignName"], "HR");
        assert_eq!(params["TemplateCode"], "SMS_71390007");
        assert_eq!(params["TemplateParam"], r#"{"code":"123456"}"#);
        assert_eq!(params["SignatureMethod"], "HMAC-SHA1");
        assert_eq!(params["Version"], "2017-05-25");
        assert!(params["Timestamp"].ends_with('Z'));
    }

    #[test]
    fn test_unmapped_template_passes_through() {
        let mut message = SmsMessage::new("13800138000", "SMS_999");
        message.sign_name = Some("Payroll".to_string());

        let params = provider().send_params(&message).unwrap();

        assert_eq!(params["TemplateCode"], "SMS_999");
        assert_eq!(params["SignName"], "Payroll");
    }
}
