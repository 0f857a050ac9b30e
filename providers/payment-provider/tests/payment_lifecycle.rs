use async_trait::async_trait;
use chrono::Utc;
use payment_provider::{
    CreateOrderRequest, Order, OrderLookup, OrderStatus, OrderUpdate, PaymentError, PaymentManager,
    PaymentNotification, PaymentProvider, Refund, RefundRequest, RefundStatus,
};
use pretty_assertions::assert_eq;
use provider_common::{DispatchError, Provider, RetryConfig, SelectionPolicy};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory gateway; notifications are trusted when the body starts with
/// `signed:` and carry `<order_id>:<status>` after the prefix. Orders with
/// no reported status are unknown to it.
struct FakeGateway {
    name: &'static str,
    available: bool,
    reported: Mutex<Option<OrderStatus>>,
    refund_status: RefundStatus,
    refund_delay: Duration,
    calls: AtomicU32,
    refunds: AtomicU32,
}

impl FakeGateway {
    fn new(name: &'static str, available: bool) -> Arc<Self> {
        Arc::new(Self {
            available,
            ..Self::gateway(name, RefundStatus::Success, Duration::ZERO)
        })
    }

    fn with_refunds(name: &'static str, refund_status: RefundStatus, delay: Duration) -> Arc<Self> {
        Arc::new(Self::gateway(name, refund_status, delay))
    }

    fn gateway(name: &'static str, refund_status: RefundStatus, delay: Duration) -> Self {
        Self {
            name,
            available: true,
            reported: Mutex::new(None),
            refund_status,
            refund_delay: delay,
            calls: AtomicU32::new(0),
            refunds: AtomicU32::new(0),
        }
    }

    fn refunds(&self) -> u32 {
        self.refunds.load(Ordering::SeqCst)
    }

    fn report(&self, status: OrderStatus) {
        *self.reported.lock().unwrap() = Some(status);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeGateway {
    fn name(&self) -> &str {
        self.name
    }

    async fn test_connection(&self) -> bool {
        self.available
    }
}

#[async_trait]
impl PaymentProvider for FakeGateway {
    async fn create_order(&self, request: &CreateOrderRequest) -> Option<Order> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.available.then(|| {
            let mut order = Order::pending(request, self.name);
            order.qr_code = Some(format!("fake://{}", request.order_id));
            order
        })
    }

    async fn query_order(&self, order_id: &str) -> Option<OrderLookup> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return None;
        }
        let Some(status) = *self.reported.lock().unwrap() else {
            return Some(OrderLookup::NotFound);
        };
        Some(OrderLookup::Found(OrderUpdate {
            order_id: order_id.to_string(),
            status,
            transaction_id: Some(format!("tx-{}", order_id)),
            amount: None,
            paid_at: (status == OrderStatus::Paid).then(Utc::now),
        }))
    }

    async fn refund(&self, request: &RefundRequest) -> Option<Refund> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.refund_delay.is_zero() {
            tokio::time::sleep(self.refund_delay).await;
        }
        self.refunds.fetch_add(1, Ordering::SeqCst);
        Some(Refund {
            refund_id: request.refund_id.clone(),
            order_id: request.order_id.clone(),
            amount: request.amount,
            status: self.refund_status,
            refunded_at: Some(Utc::now()),
        })
    }

    fn verify_notification(&self, notification: &PaymentNotification) -> bool {
        notification.body.starts_with("signed:")
    }

    fn parse_notification(&self, notification: &PaymentNotification) -> Option<OrderUpdate> {
        let payload = notification.body.split_once(':')?.1;
        let (order_id, status) = payload.split_once(':')?;
        let status = match status {
            "paid" => OrderStatus::Paid,
            "failed" => OrderStatus::Failed,
            _ => return None,
        };
        Some(OrderUpdate {
            order_id: order_id.to_string(),
            status,
            transaction_id: None,
            amount: None,
            paid_at: None,
        })
    }
}

fn amount(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn request(order_id: &str) -> CreateOrderRequest {
    let mut request = CreateOrderRequest::new(amount("50.00"), "Payroll add-on");
    request.order_id = order_id.to_string();
    request
}

fn manager(gateways: &[Arc<FakeGateway>], attempts: u32) -> PaymentManager {
    let mut manager = PaymentManager::new(SelectionPolicy::Priority, RetryConfig::new(attempts, 1000));
    for (priority, gateway) in gateways.iter().enumerate() {
        manager.register(gateway.clone(), priority as u32).unwrap();
    }
    manager
}

#[tokio::test(start_paused = true)]
async fn test_pending_paid_refunded() {
    let gateway = FakeGateway::new("gateway-a", true);
    let manager = manager(&[gateway.clone()], 3);

    let order = manager.create_order("gateway-a", &request("L1")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    gateway.report(OrderStatus::Paid);
    let order = manager.query_order("gateway-a", "L1").await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.transaction_id.as_deref(), Some("tx-L1"));

    let refund = manager
        .refund("gateway-a", &RefundRequest::new("L1", amount("50.00")))
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Success);
    assert_eq!(manager.get_order("L1").unwrap().status, OrderStatus::Refunded);
}

#[tokio::test(start_paused = true)]
async fn test_refund_on_pending_order_is_rejected() {
    let gateway = FakeGateway::new("gateway-a", true);
    let manager = manager(&[gateway.clone()], 3);
    manager.create_order("gateway-a", &request("L2")).await.unwrap();
    let calls_before = gateway.calls();

    let result = manager
        .refund("gateway-a", &RefundRequest::new("L2", amount("50.00")))
        .await;

    assert!(matches!(result, Err(PaymentError::NotRefundable { .. })));
    assert_eq!(gateway.calls(), calls_before);
    assert_eq!(manager.get_order("L2").unwrap().status, OrderStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_refund_larger_than_order_is_rejected() {
    let gateway = FakeGateway::new("gateway-a", true);
    let manager = manager(&[gateway.clone()], 1);
    manager.create_order("gateway-a", &request("L3")).await.unwrap();
    gateway.report(OrderStatus::Paid);
    manager.query_order("gateway-a", "L3").await.unwrap();

    let result = manager
        .refund("gateway-a", &RefundRequest::new("L3", amount("50.01")))
        .await;

    assert!(matches!(result, Err(PaymentError::InvalidRequest(_))));
    assert_eq!(manager.get_order("L3").unwrap().status, OrderStatus::Paid);
}

#[tokio::test(start_paused = true)]
async fn test_query_unknown_order_is_not_found() {
    let gateway = FakeGateway::new("gateway-a", true);
    let manager = manager(&[gateway.clone()], 3);

    let result = manager.query_order("gateway-a", "missing").await;

    assert!(matches!(result, Err(PaymentError::OrderNotFound(id)) if id == "missing"));
    assert_eq!(gateway.calls(), 1);
    assert!(manager.get_order("missing").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_query_unreachable_gateway_exhausts_retries() {
    let gateway = FakeGateway::new("gateway-a", false);
    let manager = manager(&[gateway.clone()], 3);

    let result = manager.query_order("gateway-a", "L10").await;

    assert!(matches!(
        result,
        Err(PaymentError::Dispatch(DispatchError::ProviderExhausted { attempts: 3, .. }))
    ));
    assert_eq!(gateway.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_refunds_pay_out_once() {
    let gateway = FakeGateway::with_refunds("slow", RefundStatus::Success, Duration::from_millis(100));
    let manager = manager(&[gateway.clone()], 3);
    manager.create_order("slow", &request("L11")).await.unwrap();
    gateway.report(OrderStatus::Paid);
    manager.query_order("slow", "L11").await.unwrap();

    let first = RefundRequest::new("L11", amount("50.00"));
    let second = RefundRequest::new("L11", amount("50.00"));
    let (a, b) = tokio::join!(manager.refund("slow", &first), manager.refund("slow", &second));

    assert_eq!(gateway.refunds(), 1);
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(PaymentError::RefundInProgress(id)) if id == "L11")));
    assert_eq!(manager.get_order("L11").unwrap().status, OrderStatus::Refunded);

    let again = manager
        .refund("slow", &RefundRequest::new("L11", amount("50.00")))
        .await;
    assert!(matches!(
        again,
        Err(PaymentError::NotRefundable { status: OrderStatus::Refunded, .. })
    ));
    assert_eq!(gateway.refunds(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refund_releases_order() {
    let gateway = FakeGateway::with_refunds("gateway-a", RefundStatus::Failed, Duration::ZERO);
    let manager = manager(&[gateway.clone()], 1);
    manager.create_order("gateway-a", &request("L12")).await.unwrap();
    gateway.report(OrderStatus::Paid);
    manager.query_order("gateway-a", "L12").await.unwrap();

    for _ in 0..2 {
        let refund = manager
            .refund("gateway-a", &RefundRequest::new("L12", amount("20.00")))
            .await
            .unwrap();
        assert_eq!(refund.status, RefundStatus::Failed);
    }

    assert_eq!(gateway.refunds(), 2);
    assert_eq!(manager.get_order("L12").unwrap().status, OrderStatus::Paid);
}

#[tokio::test(start_paused = true)]
async fn test_regressing_gateway_report_is_ignored() {
    let gateway = FakeGateway::new("gateway-a", true);
    let manager = manager(&[gateway.clone()], 1);
    manager.create_order("gateway-a", &request("L4")).await.unwrap();

    manager
        .handle_notification("gateway-a", &PaymentNotification::new("signed:L4:failed"))
        .unwrap();
    gateway.report(OrderStatus::Paid);

    let order = manager.query_order("gateway-a", "L4").await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_create_order_any_fails_over() {
    let down = FakeGateway::new("gateway-a", false);
    let up = FakeGateway::new("gateway-b", true);
    let manager = manager(&[down.clone(), up.clone()], 2);

    let order = manager.create_order_any(&request("L5")).await.unwrap();

    assert_eq!(order.provider, "gateway-b");
    assert_eq!(down.calls(), 2);
    assert_eq!(up.calls(), 1);
    let stats = manager.all_stats();
    assert_eq!(stats[0].failed, 2);
    assert_eq!(stats[1].sent, 1);
}

#[tokio::test]
async fn test_invalid_request_never_reaches_gateway() {
    let gateway = FakeGateway::new("gateway-a", true);
    let manager = manager(&[gateway.clone()], 3);

    let mut bad = request("L6");
    bad.amount = amount("0");

    assert!(matches!(
        manager.create_order("gateway-a", &bad).await,
        Err(PaymentError::InvalidRequest(_))
    ));
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn test_unknown_provider() {
    let manager = manager(&[FakeGateway::new("gateway-a", true)], 1);

    assert!(matches!(
        manager.create_order("gateway-z", &request("L7")).await,
        Err(PaymentError::Dispatch(DispatchError::UnknownProvider(_)))
    ));
}

#[tokio::test]
async fn test_untrusted_notification_is_not_applied() {
    let gateway = FakeGateway::new("gateway-a", true);
    let manager = manager(&[gateway], 1);
    manager.create_order("gateway-a", &request("L8")).await.unwrap();

    assert!(matches!(
        manager.handle_notification("gateway-a", &PaymentNotification::new("forged:L8:paid")),
        Err(PaymentError::UntrustedNotification)
    ));
    assert_eq!(manager.get_order("L8").unwrap().status, OrderStatus::Pending);

    assert!(matches!(
        manager.handle_notification("gateway-a", &PaymentNotification::new("signed:L8:weird")),
        Err(PaymentError::MalformedNotification(_))
    ));
}

#[tokio::test]
async fn test_connection_report() {
    let manager = manager(
        &[FakeGateway::new("gateway-a", true), FakeGateway::new("gateway-b", false)],
        1,
    );

    let report = manager.test_all_connections().await;

    assert_eq!(report.get("gateway-a"), Some(&true));
    assert_eq!(report.get("gateway-b"), Some(&false));
}
