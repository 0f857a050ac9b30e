//! Alipay open platform gateway (RSA2 signed form API)

use crate::codec::{format_cst, parse_cst, parse_form, signing_string, yuan};
use crate::order::{
    CreateOrderRequest, Order, OrderLookup, OrderStatus, OrderUpdate, PaymentNotification, Refund,
    RefundRequest, RefundStatus,
};
use crate::provider::PaymentProvider;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use provider_common::{Provider, ProviderError};
use reqwest::Client;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const ALIPAY_GATEWAY: &str = "https://openapi.alipay.com/gateway.do";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SUCCESS_CODE: &str = "10000";
/// Business failure; the request itself was authenticated
const BUSINESS_FAILURE_CODE: &str = "40004";
const TRADE_NOT_EXIST: &str = "ACQ.TRADE_NOT_EXIST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlipayConfig {
    pub app_id: String,
    /// Merchant application private key, PEM or bare base64 DER
    pub private_key: String,
    /// Alipay platform public key used to verify callbacks
    pub alipay_public_key: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn decode_der(material: &str) -> Result<Vec<u8>, ProviderError> {
    BASE64
        .decode(material)
        .map_err(|e| ProviderError::InvalidConfiguration(format!("Invalid key base64: {}", e)))
}

/// Accepts PKCS#8 or PKCS#1, as PEM or as the bare base64 DER the Alipay
/// console hands out
pub fn load_private_key(material: &str) -> Result<RsaPrivateKey, ProviderError> {
    let material = material.trim();
    let parsed = if material.starts_with("-----BEGIN") {
        RsaPrivateKey::from_pkcs8_pem(material)
            .ok()
            .or_else(|| RsaPrivateKey::from_pkcs1_pem(material).ok())
    } else {
        let der = decode_der(material)?;
        RsaPrivateKey::from_pkcs8_der(&der)
            .ok()
            .or_else(|| RsaPrivateKey::from_pkcs1_der(&der).ok())
    };
    parsed.ok_or_else(|| ProviderError::InvalidConfiguration("Invalid RSA private key".to_string()))
}

pub fn load_public_key(material: &str) -> Result<RsaPublicKey, ProviderError> {
    let material = material.trim();
    let parsed = if material.starts_with("-----BEGIN") {
        RsaPublicKey::from_public_key_pem(material)
            .ok()
            .or_else(|| RsaPublicKey::from_pkcs1_pem(material).ok())
    } else {
        let der = decode_der(material)?;
        RsaPublicKey::from_public_key_der(&der)
            .ok()
            .or_else(|| RsaPublicKey::from_pkcs1_der(&der).ok())
    };
    parsed.ok_or_else(|| ProviderError::InvalidConfiguration("Invalid RSA public key".to_string()))
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    sub_code: Option<String>,
    #[serde(default)]
    sub_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrecreateResponse {
    out_trade_no: String,
    qr_code: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    out_trade_no: String,
    #[serde(default)]
    trade_no: Option<String>,
    trade_status: String,
    #[serde(default)]
    total_amount: Option<String>,
    #[serde(default)]
    send_pay_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    #[serde(default)]
    fund_change: Option<String>,
    #[serde(default)]
    gmt_refund_pay: Option<String>,
}

pub fn trade_status(value: &str) -> Option<OrderStatus> {
    match value {
        "WAIT_BUYER_PAY" => Some(OrderStatus::Pending),
        "TRADE_SUCCESS" | "TRADE_FINISHED" => Some(OrderStatus::Paid),
        "TRADE_CLOSED" => Some(OrderStatus::Cancelled),
        _ => None,
    }
}

pub struct AlipayProvider {
    client: Client,
    config: AlipayConfig,
    gateway: String,
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
}

impl AlipayProvider {
    /// Malformed key material is rejected here rather than on first use
    pub fn new(config: AlipayConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
            })?;

        let signing_key = SigningKey::<Sha256>::new(load_private_key(&config.private_key)?);
        let verifying_key = VerifyingKey::<Sha256>::new(load_public_key(&config.alipay_public_key)?);
        let gateway = config
            .gateway
            .clone()
            .unwrap_or_else(|| ALIPAY_GATEWAY.to_string());

        Ok(Self {
            client,
            config,
            gateway,
            signing_key,
            verifying_key,
        })
    }

    /// RSA2 signature over the sorted, non-empty parameters
    pub fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, ProviderError> {
        let content = signing_string(params, &["sign"]);
        let signature = self
            .signing_key
            .try_sign(content.as_bytes())
            .map_err(|e| ProviderError::Signing(e.to_string()))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }

    fn verify(&self, content: &str, signature: &str) -> bool {
        let Ok(bytes) = BASE64.decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(bytes.as_slice()) else {
            return false;
        };
        self.verifying_key
            .verify(content.as_bytes(), &signature)
            .is_ok()
    }

    /// Signed request parameters for one API method
    pub fn request_params(
        &self,
        method: &str,
        biz_content: &serde_json::Value,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), self.config.app_id.clone());
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "JSON".to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), "RSA2".to_string());
        params.insert(
            "timestamp".to_string(),
            format_cst(Utc::now(), TIMESTAMP_FORMAT),
        );
        params.insert("version".to_string(), "1.0".to_string());
        if let Some(notify_url) = &self.config.notify_url {
            params.insert("notify_url".to_string(), notify_url.clone());
        }
        params.insert("biz_content".to_string(), biz_content.to_string());

        let sign = self.sign(&params)?;
        params.insert("sign".to_string(), sign);
        Ok(params)
    }

    /// Call `method` and return the `<method>_response` node on success.
    ///
    /// Any code other than 10000 is a failure, reported as `Rejected`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        biz_content: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let params = self.request_params(method, &biz_content)?;
        let response = self.client.post(&self.gateway).form(&params).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16()));
        }

        let body: serde_json::Value = response.json().await?;
        let node_name = format!("{}_response", method.replace('.', "_"));
        let node = body
            .get(&node_name)
            .cloned()
            .ok_or_else(|| ProviderError::MalformedResponse(format!("missing {}", node_name)))?;

        let header: GatewayResponse = serde_json::from_value(node.clone())
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        if header.code != SUCCESS_CODE {
            return Err(ProviderError::Rejected {
                code: header.sub_code.unwrap_or(header.code),
                message: header.sub_msg.unwrap_or(header.msg),
            });
        }

        serde_json::from_value(node).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }

    pub async fn precreate(&self, request: &CreateOrderRequest) -> Result<Order, ProviderError> {
        let mut biz = json!({
            "out_trade_no": request.order_id,
            "total_amount": yuan(request.amount),
            "subject": request.subject,
        });
        if let Some(description) = &request.description {
            biz["body"] = json!(description);
        }
        if let Some(minutes) = request.expires_in_minutes {
            biz["timeout_express"] = json!(format!("{}m", minutes));
        }

        let response: PrecreateResponse = self.call("alipay.trade.precreate", biz).await?;
        debug!(order_id = %response.out_trade_no, "Alipay precreate succeeded");

        let mut order = Order::pending(request, self.name());
        order.qr_code = Some(response.qr_code.clone());
        order.payment_url = Some(response.qr_code);
        Ok(order)
    }

    pub async fn query(&self, order_id: &str) -> Result<OrderLookup, ProviderError> {
        let response: QueryResponse = match self
            .call("alipay.trade.query", json!({ "out_trade_no": order_id }))
            .await
        {
            Ok(response) => response,
            Err(ProviderError::Rejected { code, .. }) if code == TRADE_NOT_EXIST => {
                return Ok(OrderLookup::NotFound)
            }
            Err(e) => return Err(e),
        };

        let status = trade_status(&response.trade_status).ok_or_else(|| {
            ProviderError::MalformedResponse(format!(
                "unknown trade_status {}",
                response.trade_status
            ))
        })?;

        Ok(OrderLookup::Found(OrderUpdate {
            order_id: response.out_trade_no,
            status,
            transaction_id: response.trade_no,
            amount: response
                .total_amount
                .and_then(|a| Decimal::from_str(&a).ok()),
            paid_at: response
                .send_pay_date
                .and_then(|t| parse_cst(&t, TIMESTAMP_FORMAT)),
        }))
    }

    pub async fn request_refund(&self, request: &RefundRequest) -> Result<Refund, ProviderError> {
        let mut biz = json!({
            "out_trade_no": request.order_id,
            "refund_amount": yuan(request.amount),
            "out_request_no": request.refund_id,
        });
        if let Some(reason) = &request.reason {
            biz["refund_reason"] = json!(reason);
        }

        let response: RefundResponse = self.call("alipay.trade.refund", biz).await?;

        // fund_change=N means this refund request was already processed
        let status = match response.fund_change.as_deref() {
            Some("Y") => RefundStatus::Success,
            _ => RefundStatus::Processing,
        };

        Ok(Refund {
            refund_id: request.refund_id.clone(),
            order_id: request.order_id.clone(),
            amount: request.amount,
            status,
            refunded_at: response
                .gmt_refund_pay
                .and_then(|t| parse_cst(&t, TIMESTAMP_FORMAT))
                .or_else(|| (status == RefundStatus::Success).then(Utc::now)),
        })
    }
}

#[async_trait]
impl Provider for AlipayProvider {
    fn name(&self) -> &str {
        "alipay"
    }

    /// Query a non-existent trade: an authenticated "trade not exist"
    /// answer proves both connectivity and valid credentials
    async fn test_connection(&self) -> bool {
        match self.query("connection-test").await {
            Ok(_) => true,
            Err(ProviderError::Rejected { code, .. }) if code == BUSINESS_FAILURE_CODE => true,
            Err(e) => {
                warn!(error = %e, "Alipay connection test failed");
                false
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for AlipayProvider {
    async fn create_order(&self, request: &CreateOrderRequest) -> Option<Order> {
        self.precreate(request)
            .await
            .map_err(|e| {
                error!(provider = "alipay", order_id = %request.order_id, error_code = e.error_code(), error = %e, "Failed to create order");
            })
            .ok()
    }

    async fn query_order(&self, order_id: &str) -> Option<OrderLookup> {
        self.query(order_id)
            .await
            .map_err(|e| {
                warn!(provider = "alipay", order_id, error = %e, "Failed to query order");
            })
            .ok()
    }

    async fn refund(&self, request: &RefundRequest) -> Option<Refund> {
        self.request_refund(request)
            .await
            .map_err(|e| {
                error!(provider = "alipay", order_id = %request.order_id, error = %e, "Failed to refund order");
            })
            .ok()
    }

    fn verify_notification(&self, notification: &PaymentNotification) -> bool {
        let params = parse_form(&notification.body);

        let Some(signature) = params.get("sign") else {
            warn!("Alipay notification without signature");
            return false;
        };
        if params.get("app_id") != Some(&self.config.app_id) {
            warn!(app_id = ?params.get("app_id"), "Alipay notification for another app");
            return false;
        }

        let content = signing_string(&params, &["sign", "sign_type"]);
        let valid = self.verify(&content, signature);
        if !valid {
            warn!(order_id = ?params.get("out_trade_no"), "Alipay notification signature mismatch");
        }
        valid
    }

    fn parse_notification(&self, notification: &PaymentNotification) -> Option<OrderUpdate> {
        let params = parse_form(&notification.body);
        Some(OrderUpdate {
            order_id: params.get("out_trade_no")?.clone(),
            status: trade_status(params.get("trade_status")?)?,
            transaction_id: params.get("trade_no").cloned(),
            amount: params
                .get("total_amount")
                .and_then(|a| Decimal::from_str(a).ok()),
            paid_at: params
                .get("gmt_payment")
                .and_then(|t| parse_cst(t, TIMESTAMP_FORMAT)),
        })
    }
}
