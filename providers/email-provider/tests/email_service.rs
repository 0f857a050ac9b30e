use async_trait::async_trait;
use email_provider::{
    AlertSeverity, EmailManager, EmailMessage, EmailService, SendGridConfig, SendGridProvider,
};
use pretty_assertions::assert_eq;
use provider_common::{MessageProvider, Provider, RetryConfig, SelectionPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Provider that refuses every message
struct DownProvider {
    calls: AtomicU32,
}

#[async_trait]
impl Provider for DownProvider {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn test_connection(&self) -> bool {
        false
    }
}

#[async_trait]
impl MessageProvider<EmailMessage> for DownProvider {
    async fn send(&self, _message: &EmailMessage) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        false
    }
}

fn sendgrid(server: &MockServer) -> Arc<SendGridProvider> {
    Arc::new(
        SendGridProvider::new(SendGridConfig {
            api_key: "test-api-key".to_string(),
            from_email: "noreply@example.com".to_string(),
            from_name: None,
            base_url: Some(server.uri()),
            timeout_secs: 5,
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn test_fails_over_to_second_provider() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let down = Arc::new(DownProvider {
        calls: AtomicU32::new(0),
    });
    let mut manager = EmailManager::new(SelectionPolicy::Priority, RetryConfig::new(3, 10));
    manager.register(down.clone(), 1).unwrap();
    manager.register(sendgrid(&mock_server), 2).unwrap();
    let service = EmailService::new(Arc::new(manager));

    let result = service
        .send_alert_email(
            "oncall@example.com",
            "Payroll export failed",
            "Export job exited with code 1",
            AlertSeverity::Critical,
        )
        .await;

    assert!(result.success);
    assert_eq!(result.provider.as_deref(), Some("sendgrid"));
    assert_eq!(result.attempts, 4);
    assert_eq!(down.calls.load(Ordering::SeqCst), 3);

    let stats = service.get_stats();
    assert_eq!((stats[0].provider.as_str(), stats[0].failed), ("smtp", 3));
    assert_eq!((stats[1].provider.as_str(), stats[1].sent), ("sendgrid", 1));
}

#[tokio::test]
async fn test_verification_code_reaches_vendor() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .and(body_string_contains("482913"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut manager = EmailManager::new(SelectionPolicy::Priority, RetryConfig::new(1, 10));
    manager.register(sendgrid(&mock_server), 1).unwrap();
    let service = EmailService::new(Arc::new(manager));

    let result = service
        .send_verification_code("new.hire@example.com", "482913", 10)
        .await;

    assert!(result.success);
}

#[tokio::test]
async fn test_single_provider_exhaustion() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut manager = EmailManager::new(SelectionPolicy::Priority, RetryConfig::new(2, 10));
    manager.register(sendgrid(&mock_server), 1).unwrap();
    let service = EmailService::new(Arc::new(manager));

    let result = service
        .send_notification_email("staff@example.com", "Office closed", "<p>Closed Friday</p>")
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("all providers failed"));
    assert_eq!(service.get_stats()[0].failed, 2);
}

#[tokio::test]
async fn test_connection_report_covers_every_provider() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/scopes"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut manager = EmailManager::new(SelectionPolicy::Priority, RetryConfig::default());
    manager
        .register(
            Arc::new(DownProvider {
                calls: AtomicU32::new(0),
            }),
            1,
        )
        .unwrap();
    manager.register(sendgrid(&mock_server), 2).unwrap();
    let service = EmailService::new(Arc::new(manager));

    let report = service.test_connection().await;

    assert_eq!(report.get("smtp"), Some(&false));
    assert_eq!(report.get("sendgrid"), Some(&true));
}
