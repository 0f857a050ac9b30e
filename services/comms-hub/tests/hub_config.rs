use comms_hub::{CommsHub, HubConfig, HubError};
use pretty_assertions::assert_eq;
use provider_common::SelectionPolicy;
use serial_test::serial;
use std::env;

const VARS: &[(&str, &str)] = &[
    ("EMAIL_STRATEGY", "round-robin"),
    ("EMAIL_FROM_EMAIL", "noreply@hr.example.com"),
    ("EMAIL_SENDGRID__API_KEY", "SG.test"),
    ("SMS_SIGN_NAME", "HR"),
    ("SMS_RETRY_ATTEMPTS", "2"),
    ("SMS_TENCENT__SECRET_ID", "AKIDtest"),
    ("SMS_TENCENT__SECRET_KEY", "secret"),
    ("SMS_TENCENT__SDK_APP_ID", "1400000000"),
    ("PAYMENT_WECHAT__APP_ID", "wx2421b1c4370ec43b"),
    ("PAYMENT_WECHAT__MCH_ID", "10000100"),
    ("PAYMENT_WECHAT__API_KEY", "192006250b4c09247ec02edce69f6a2d"),
    ("PAYMENT_WECHAT__NOTIFY_URL", "https://hr.example.com/payments/wechat"),
];

fn set_vars(vars: &[(&str, &str)]) {
    for (key, value) in vars {
        env::set_var(key, value);
    }
}

fn clear_vars(vars: &[(&str, &str)]) {
    for (key, _) in vars {
        env::remove_var(key);
    }
}

#[tokio::test]
#[serial]
async fn test_hub_from_environment() {
    set_vars(VARS);
    let config = HubConfig::from_env();
    clear_vars(VARS);
    let config = config.unwrap();

    assert_eq!(config.email.manager.strategy, SelectionPolicy::RoundRobin);
    assert_eq!(config.sms.manager.retry_attempts, 2);
    assert_eq!(config.payments.manager.retry_attempts, 3);

    let hub = CommsHub::from_config(&config).unwrap();

    assert_eq!(hub.email().manager().provider_names(), vec!["sendgrid".to_string()]);
    assert_eq!(hub.sms().manager().provider_names(), vec!["tencent".to_string()]);
    assert_eq!(hub.payments().provider_names(), vec!["wechat".to_string()]);

    let stats = hub.all_stats();
    assert_eq!(stats.email.len(), 1);
    assert_eq!(stats.sms[0].sent, 0);
}

#[tokio::test]
#[serial]
async fn test_empty_environment_builds_idle_hub() {
    clear_vars(VARS);
    let hub = CommsHub::from_env().unwrap();

    let result = hub
        .email()
        .send_verification_code("someone@example.com", "482913", 10)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("no providers configured"));
    assert!(hub.all_stats().email.is_empty());
    assert!(hub.test_all_connections().await.all_healthy());
}

#[tokio::test]
#[serial]
async fn test_out_of_range_retry_attempts_is_rejected() {
    let vars = [("SMS_RETRY_ATTEMPTS", "0")];
    set_vars(&vars);
    let result = HubConfig::from_env();
    clear_vars(&vars);

    assert!(matches!(result, Err(HubError::Config { domain: "sms", .. })));
}

#[tokio::test]
#[serial]
async fn test_cloned_config_keeps_manager_and_ledger_settings() {
    let vars = [
        ("EMAIL_STRATEGY", "random"),
        ("PAYMENT_RETRY_BASE_DELAY_MS", "250"),
        ("PAYMENT_LEDGER_CAPACITY", "64"),
    ];
    set_vars(&vars);
    let config = HubConfig::from_env();
    clear_vars(&vars);
    let config = config.unwrap();

    let copy = config.clone();

    assert_eq!(copy, config);
    assert_eq!(copy.email.manager.strategy, SelectionPolicy::Random);
    assert_eq!(copy.payments.manager.retry_base_delay_ms, 250);
    assert_eq!(copy.payments.ledger_capacity, Some(64));
}
