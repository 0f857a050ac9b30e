//! Tencent Cloud SMS client (JSON API, TC3-HMAC-SHA256 signature)

use crate::message::SmsMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provider_common::signing::{hmac_sha256, sha256_hex};
use provider_common::{MessageProvider, Provider, ProviderError};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const TENCENT_ENDPOINT: &str = "https://sms.tencentcloudapi.com";
const API_VERSION: &str = "2021-01-11";
const SERVICE: &str = "sms";
const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TencentSmsConfig {
    pub secret_id: String,
    pub secret_key: String,
    pub sdk_app_id: String,
    pub sign_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Logical template name to Tencent template id
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "ap-guangzhou".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    response: ResponseBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseBody {
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    send_status_set: Vec<SendStatus>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendStatus {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    phone_number: String,
}

/// Build the `Authorization` header value for one request
pub fn authorization(
    secret_id: &str,
    secret_key: &str,
    host: &str,
    payload: &str,
    timestamp: DateTime<Utc>,
) -> Result<String, ProviderError> {
    let date = timestamp.format("%Y-%m-%d").to_string();
    let signed_headers = "content-type;host";

    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\n\n{}\n{}",
        CONTENT_TYPE,
        host,
        signed_headers,
        sha256_hex(payload.as_bytes())
    );

    let credential_scope = format!("{}/{}/tc3_request", date, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp.timestamp(),
        credential_scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let secret_date = hmac_sha256(format!("TC3{}", secret_key).as_bytes(), date.as_bytes())?;
    let secret_service = hmac_sha256(&secret_date, SERVICE.as_bytes())?;
    let secret_signing = hmac_sha256(&secret_service, b"tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, secret_id, credential_scope, signed_headers, signature
    ))
}

/// Tencent requires E.164 numbers; bare numbers are taken as mainland China
pub fn to_e164(phone: &str) -> String {
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("+86{}", phone)
    }
}

pub struct TencentSmsProvider {
    client: Client,
    config: TencentSmsConfig,
    endpoint: String,
    host: String,
}

impl TencentSmsProvider {
    pub fn new(config: TencentSmsConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
            })?;

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| TENCENT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        let url = Url::parse(&endpoint).map_err(|e| {
            ProviderError::InvalidConfiguration(format!("Invalid endpoint {}: {}", endpoint, e))
        })?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ProviderError::InvalidConfiguration(format!(
                    "Endpoint has no host: {}",
                    endpoint
                )))
            }
        };

        Ok(Self {
            client,
            config,
            endpoint,
            host,
        })
    }

    pub fn send_payload(&self, message: &SmsMessage) -> serde_json::Value {
        let template_id = self
            .config
            .templates
            .get(&message.template_code)
            .unwrap_or(&message.template_code);

        json!({
            "PhoneNumberSet": message.phone_numbers.iter().map(|p| to_e164(p)).collect::<Vec<_>>(),
            "SmsSdkAppId": self.config.sdk_app_id,
            "SignName": message.sign_name.as_deref().unwrap_or(&self.config.sign_name),
            "TemplateId": template_id,
            "TemplateParamSet": message.template_params.iter().map(|(_, v)| v.as_str()).collect::<Vec<_>>()
        })
    }

    async fn call(&self, action: &str, payload: &serde_json::Value) -> Result<ResponseBody, ProviderError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
        let now = Utc::now();
        let authorization = authorization(
            &self.config.secret_id,
            &self.config.secret_key,
            &self.host,
            &body,
            now,
        )?;

        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("Authorization", authorization)
            .header("Content-Type", CONTENT_TYPE)
            .header("Host", &self.host)
            .header("X-TC-Action", action)
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("X-TC-Region", &self.config.region)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16()));
        }

        let envelope: Envelope = response.json().await?;
        let body = envelope.response;
        if let Some(error) = body.error {
            return Err(ProviderError::Rejected {
                code: error.code,
                message: error.message,
            });
        }
        Ok(body)
    }

    pub async fn deliver(&self, message: &SmsMessage) -> Result<(), ProviderError> {
        message.validate()?;
        let response = self.call("SendSms", &self.send_payload(message)).await?;

        if response.send_status_set.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "SendStatusSet is empty".to_string(),
            ));
        }

        // Partial delivery counts as a failed attempt
        if let Some(failed) = response.send_status_set.iter().find(|s| s.code != "Ok") {
            return Err(ProviderError::Rejected {
                code: failed.code.clone(),
                message: format!("{}: {}", failed.phone_number, failed.message),
            });
        }

        debug!(request_id = ?response.request_id, "Tencent accepted SMS");
        Ok(())
    }
}

#[async_trait]
impl Provider for TencentSmsProvider {
    fn name(&self) -> &str {
        "tencent"
    }

    async fn test_connection(&self) -> bool {
        let payload = json!({ "SmsSdkAppId": self.config.sdk_app_id, "Limit": 1 });
        match self.call("PullSmsSendStatus", &payload).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Tencent connection test failed");
                false
            }
        }
    }
}

#[async_trait]
impl MessageProvider<SmsMessage> for TencentSmsProvider {
    async fn send(&self, message: &SmsMessage) -> bool {
        match self.deliver(message).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    provider = "tencent",
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
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn config(endpoint: Option<&str>) -> TencentSmsConfig {
        TencentSmsConfig {
            secret_id: "AKIDtest".to_string(),
            secret_key: "secret".to_string(),
            sdk_app_id: "1400000000".to_string(),
            sign_name: "HR".to_string(),
            region: default_region(),
            endpoint: endpoint.map(str::to_string),
            templates: BTreeMap::new(),
            timeout_secs: 10,
        }
    }

    #[test]
    fn test_authorization_header_shape() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let header =
            authorization("AKIDtest", "secret", "sms.tencentcloudapi.com", "{}", timestamp).unwrap();

        let prefix =
            "TC3-HMAC-SHA256 Credential=AKIDtest/2024-03-01/sms/tc3_request, SignedHeaders=content-type;host, Signature=";
        assert!(header.starts_with(prefix));
        assert_eq!(header[prefix.len()..].len(), 64);

        let again =
            authorization("AKIDtest", "secret", "sms.tencentcloudapi.com", "{}", timestamp).unwrap();
        assert_eq!(header, again);
        let other_payload =
            authorization("AKIDtest", "secret", "sms.tencentcloudapi.com", "{\"a\":1}", timestamp)
                .unwrap();
        assert_ne!(header, other_payload);
    }

    #[test]
    fn test_e164() {
        assert_eq!(to_e164("13800138000"), "+8613800138000");
        assert_eq!(to_e164("+6591234567"), "+6591234567");
    }

    #[test]
    fn test_host_includes_port() {
        let provider = TencentSmsProvider::new(config(Some("http://127.0.0.1:8080"))).unwrap();
        assert_eq!(provider.host, "127.0.0.1:8080");
        let provider = TencentSmsProvider::new(config(None)).unwrap();
        assert_eq!(provider.host, "sms.tencentcloudapi.com");
    }

    #[test]
    fn test_send_payload() {
        let provider = TencentSmsProvider::new(config(None)).unwrap();
        let message = SmsMessage::new("13800138000", "1234567")
            .with_param("code", "482913")
            .with_param("minutes", "5");

        let payload = provider.send_payload(&message);

        assert_eq!(
            payload,
            json!({
                "PhoneNumberSet": ["+8613800138000"],
                "SmsSdkAppId": "1400000000",
                "SignName": "HR",
                "TemplateId": "1234567",
                "TemplateParamSet": ["482913", "5"]
            })
        );
    }
}
