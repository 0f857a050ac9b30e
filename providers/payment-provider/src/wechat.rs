//! WeChat Pay v2 gateway (HMAC-SHA256 signed XML API)

use crate::codec::{format_cst, from_fen, parse_cst, signing_string, to_fen};
use crate::order::{
    CreateOrderRequest, Order, OrderLookup, OrderStatus, OrderUpdate, PaymentNotification, Refund,
    RefundRequest, RefundStatus,
};
use crate::provider::PaymentProvider;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use provider_common::signing::{constant_time_eq, hmac_sha256};
use provider_common::{Provider, ProviderError};
use regex::Regex;
use reqwest::{Client, Identity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const WECHAT_ENDPOINT: &str = "https://api.mch.weixin.qq.com";
const TIME_FORMAT: &str = "%Y%m%d%H%M%S";
const ORDER_NOT_EXIST: &str = "ORDERNOTEXIST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WechatPayConfig {
    pub app_id: String,
    pub mch_id: String,
    /// Merchant API key used for HMAC-SHA256 signatures
    pub api_key: String,
    pub notify_url: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Merchant certificate and key (PEM), required by the refund API
    #[serde(default)]
    pub client_cert_pem: Option<String>,
    #[serde(default)]
    pub client_key_pem: Option<String>,
    #[serde(default = "default_client_ip")]
    pub spbill_create_ip: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_client_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Uppercase hex HMAC-SHA256 over `k=v&...&key=<api key>`
pub fn sign(api_key: &str, params: &BTreeMap<String, String>) -> Result<String, ProviderError> {
    let content = format!("{}&key={}", signing_string(params, &["sign"]), api_key);
    let mac = hmac_sha256(api_key.as_bytes(), content.as_bytes())?;
    Ok(hex::encode_upper(mac))
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn to_xml(params: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<xml>");
    for (key, value) in params {
        xml.push_str(&format!("<{}>{}</{}>", key, escape_xml(value), key));
    }
    xml.push_str("</xml>");
    xml
}

/// Parse the flat `<xml><key>value</key>...</xml>` documents WeChat Pay uses
pub fn parse_xml(xml: &str) -> Result<BTreeMap<String, String>, ProviderError> {
    let element = Regex::new(r"(?s)<([A-Za-z0-9_]+)>(?:<!\[CDATA\[(.*?)\]\]>|([^<]*))</([A-Za-z0-9_]+)>")
        .map_err(|e| ProviderError::MalformedResponse(format!("Regex compilation failed: {}", e)))?;

    let mut params = BTreeMap::new();
    for captures in element.captures_iter(xml) {
        let (Some(open), Some(close)) = (captures.get(1), captures.get(4)) else {
            continue;
        };
        if open.as_str() != close.as_str() {
            continue;
        }
        let value = match (captures.get(2), captures.get(3)) {
            (Some(cdata), _) => cdata.as_str().to_string(),
            (None, Some(text)) => unescape_xml(text.as_str()),
            (None, None) => String::new(),
        };
        params.insert(open.as_str().to_string(), value);
    }

    if params.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "No XML fields found".to_string(),
        ));
    }
    Ok(params)
}

pub fn trade_state(value: &str) -> Option<OrderStatus> {
    match value {
        "NOTPAY" | "USERPAYING" => Some(OrderStatus::Pending),
        "SUCCESS" => Some(OrderStatus::Paid),
        "REFUND" => Some(OrderStatus::Refunded),
        "CLOSED" | "REVOKED" => Some(OrderStatus::Cancelled),
        "PAYERROR" => Some(OrderStatus::Failed),
        _ => None,
    }
}

pub struct WechatPayProvider {
    client: Client,
    /// Client carrying the merchant certificate, when configured
    cert_client: Option<Client>,
    config: WechatPayConfig,
    endpoint: String,
}

impl WechatPayProvider {
    pub fn new(config: WechatPayConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ProviderError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
        })?;

        let cert_client = match (&config.client_cert_pem, &config.client_key_pem) {
            (Some(cert), Some(key)) => {
                let pem = format!("{}\n{}", cert.trim(), key.trim());
                let identity = Identity::from_pem(pem.as_bytes()).map_err(|e| {
                    ProviderError::InvalidConfiguration(format!("Invalid merchant certificate: {}", e))
                })?;
                let client = Client::builder()
                    .timeout(timeout)
                    .identity(identity)
                    .build()
                    .map_err(|e| {
                        ProviderError::InvalidConfiguration(format!(
                            "Failed to create HTTP client: {}",
                            e
                        ))
                    })?;
                Some(client)
            }
            _ => None,
        };

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| WECHAT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            cert_client,
            config,
            endpoint,
        })
    }

    fn base_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("appid".to_string(), self.config.app_id.clone());
        params.insert("mch_id".to_string(), self.config.mch_id.clone());
        params.insert("nonce_str".to_string(), Uuid::new_v4().simple().to_string());
        params.insert("sign_type".to_string(), "HMAC-SHA256".to_string());
        params
    }

    fn verify_params(&self, params: &BTreeMap<String, String>) -> bool {
        let Some(received) = params.get("sign") else {
            return false;
        };
        match sign(&self.config.api_key, params) {
            Ok(expected) => constant_time_eq(expected.as_bytes(), received.to_uppercase().as_bytes()),
            Err(_) => false,
        }
    }

    /// POST a signed request and return the verified response fields.
    ///
    /// Both `return_code` (transport) and `result_code` (business) must be
    /// SUCCESS; the response signature is checked before anything is trusted.
    async fn call(
        &self,
        path: &str,
        mut params: BTreeMap<String, String>,
        with_cert: bool,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let signature = sign(&self.config.api_key, &params)?;
        params.insert("sign".to_string(), signature);

        let client = if with_cert {
            self.cert_client.as_ref().unwrap_or_else(|| {
                warn!("No merchant certificate configured, refund may be rejected");
                &self.client
            })
        } else {
            &self.client
        };

        let response = client
            .post(format!("{}{}", self.endpoint, path))
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(to_xml(&params))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16()));
        }

        let fields = parse_xml(&response.text().await?)?;

        if fields.get("return_code").map(String::as_str) != Some("SUCCESS") {
            return Err(ProviderError::Rejected {
                code: fields.get("return_code").cloned().unwrap_or_default(),
                message: fields.get("return_msg").cloned().unwrap_or_default(),
            });
        }
        if !self.verify_params(&fields) {
            return Err(ProviderError::InvalidAuthentication);
        }
        if fields.get("result_code").map(String::as_str) != Some("SUCCESS") {
            return Err(ProviderError::Rejected {
                code: fields.get("err_code").cloned().unwrap_or_default(),
                message: fields.get("err_code_des").cloned().unwrap_or_default(),
            });
        }

        Ok(fields)
    }

    pub async fn unified_order(&self, request: &CreateOrderRequest) -> Result<Order, ProviderError> {
        let mut params = self.base_params();
        params.insert("body".to_string(), request.subject.clone());
        if let Some(description) = &request.description {
            params.insert("detail".to_string(), description.clone());
        }
        params.insert("out_trade_no".to_string(), request.order_id.clone());
        params.insert("total_fee".to_string(), to_fen(request.amount)?.to_string());
        params.insert(
            "spbill_create_ip".to_string(),
            self.config.spbill_create_ip.clone(),
        );
        params.insert("notify_url".to_string(), self.config.notify_url.clone());
        params.insert("trade_type".to_string(), "NATIVE".to_string());
        params.insert("product_id".to_string(), request.order_id.clone());
        if let Some(minutes) = request.expires_in_minutes {
            let expires = Utc::now() + ChronoDuration::minutes(i64::from(minutes));
            params.insert("time_expire".to_string(), format_cst(expires, TIME_FORMAT));
        }

        let fields = self.call("/pay/unifiedorder", params, false).await?;
        let code_url = fields
            .get("code_url")
            .cloned()
            .ok_or_else(|| ProviderError::MalformedResponse("missing code_url".to_string()))?;
        debug!(order_id = %request.order_id, prepay_id = ?fields.get("prepay_id"), "WeChat Pay unified order created");

        let mut order = Order::pending(request, self.name());
        order.qr_code = Some(code_url);
        Ok(order)
    }

    pub async fn order_query(&self, order_id: &str) -> Result<OrderLookup, ProviderError> {
        let mut params = self.base_params();
        params.insert("out_trade_no".to_string(), order_id.to_string());

        match self.call("/pay/orderquery", params, false).await {
            Ok(fields) => update_from_fields(&fields, "trade_state").map(OrderLookup::Found),
            Err(ProviderError::Rejected { code, .. }) if code == ORDER_NOT_EXIST => {
                Ok(OrderLookup::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn request_refund(&self, request: &RefundRequest) -> Result<Refund, ProviderError> {
        let order_amount = request.order_amount.ok_or_else(|| {
            ProviderError::MalformedPayload("order amount is required for refunds".to_string())
        })?;

        let mut params = self.base_params();
        params.insert("out_trade_no".to_string(), request.order_id.clone());
        params.insert("out_refund_no".to_string(), request.refund_id.clone());
        params.insert("total_fee".to_string(), to_fen(order_amount)?.to_string());
        params.insert("refund_fee".to_string(), to_fen(request.amount)?.to_string());
        if let Some(reason) = &request.reason {
            params.insert("refund_desc".to_string(), reason.clone());
        }

        let fields = self.call("/secapi/pay/refund", params, true).await?;
        debug!(refund_id = ?fields.get("refund_id"), "WeChat Pay refund accepted");

        Ok(Refund {
            refund_id: request.refund_id.clone(),
            order_id: request.order_id.clone(),
            amount: fields
                .get("refund_fee")
                .and_then(|fee| fee.parse().ok())
                .map(from_fen)
                .unwrap_or(request.amount),
            status: RefundStatus::Success,
            refunded_at: Some(Utc::now()),
        })
    }
}

/// Order update from query or notification fields. Notifications carry no
/// `trade_state`; a verified payment notification means the order was paid.
fn update_from_fields(
    fields: &BTreeMap<String, String>,
    state_field: &str,
) -> Result<OrderUpdate, ProviderError> {
    let order_id = fields
        .get("out_trade_no")
        .cloned()
        .ok_or_else(|| ProviderError::MalformedResponse("missing out_trade_no".to_string()))?;
    let state = fields.get(state_field).map(String::as_str).unwrap_or("SUCCESS");
    let status = trade_state(state).ok_or_else(|| {
        ProviderError::MalformedResponse(format!("unknown trade_state {}", state))
    })?;

    Ok(OrderUpdate {
        order_id,
        status,
        transaction_id: fields.get("transaction_id").cloned(),
        amount: fields
            .get("total_fee")
            .and_then(|fee| fee.parse().ok())
            .map(from_fen),
        paid_at: fields
            .get("time_end")
            .and_then(|t| parse_cst(t, TIME_FORMAT)),
    })
}

#[async_trait]
impl Provider for WechatPayProvider {
    fn name(&self) -> &str {
        "wechat"
    }

    /// Query a non-existent order: a signed ORDERNOTEXIST answer proves both
    /// connectivity and a valid API key
    async fn test_connection(&self) -> bool {
        match self.order_query("connection-test").await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "WeChat Pay connection test failed");
                false
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for WechatPayProvider {
    async fn create_order(&self, request: &CreateOrderRequest) -> Option<Order> {
        self.unified_order(request)
            .await
            .map_err(|e| {
                error!(provider = "wechat", order_id = %request.order_id, error_code = e.error_code(), error = %e, "Failed to create order");
            })
            .ok()
    }

    async fn query_order(&self, order_id: &str) -> Option<OrderLookup> {
        self.order_query(order_id)
            .await
            .map_err(|e| {
                warn!(provider = "wechat", order_id, error = %e, "Failed to query order");
            })
            .ok()
    }

    async fn refund(&self, request: &RefundRequest) -> Option<Refund> {
        self.request_refund(request)
            .await
            .map_err(|e| {
                error!(provider = "wechat", order_id = %request.order_id, error = %e, "Failed to refund order");
            })
            .ok()
    }

    fn verify_notification(&self, notification: &PaymentNotification) -> bool {
        let fields = match parse_xml(&notification.body) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "Unreadable WeChat Pay notification");
                return false;
            }
        };

        if fields.get("appid") != Some(&self.config.app_id)
            || fields.get("mch_id") != Some(&self.config.mch_id)
        {
            warn!(appid = ?fields.get("appid"), "WeChat Pay notification for another merchant");
            return false;
        }

        let valid = self.verify_params(&fields);
        if !valid {
            warn!(order_id = ?fields.get("out_trade_no"), "WeChat Pay notification signature mismatch");
        }
        valid
    }

    fn parse_notification(&self, notification: &PaymentNotification) -> Option<OrderUpdate> {
        let fields = parse_xml(&notification.body).ok()?;
        if fields.get("return_code").map(String::as_str) != Some("SUCCESS") {
            return None;
        }
        let mut update = update_from_fields(&fields, "trade_state").ok()?;
        if fields.get("result_code").map(String::as_str) != Some("SUCCESS") {
            update.status = OrderStatus::Failed;
        }
        Some(update)
    }
}
