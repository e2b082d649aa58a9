//! HTTP-level tests for the resilient client layer against a mock broker.
//!
//! Covers the classified retry policy (500 exponential, 429 linear,
//! 401 refresh-once, other statuses fail fast), token caching in memory
//! and on disk, and envelope-level rejections.

use autotrader::broker::{BrokerApi, BrokerClient, BrokerError, OrderRequest, OrderSide, RetryPolicy, TokenManager};
use autotrader::config::{BrokerConfig, Environment};
use rust_decimal_macros::dec;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn broker_config(server: &MockServer, cache_dir: &Path) -> BrokerConfig {
    BrokerConfig {
        app_key: "PSTESTKEY0001".into(),
        app_secret: "test-secret".into(),
        account_no: "12345678-01".into(),
        environment: Environment::Paper,
        base_url: Some(server.uri()),
        token_cache_dir: cache_dir.to_string_lossy().into_owned(),
        max_retries: 3,
        rate_limit_interval_ms: 1,
        request_timeout_secs: 5,
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        server_error_base: Duration::from_millis(5),
        rate_limited_step: Duration::from_millis(5),
        network_delay: Duration::from_millis(5),
    }
}

fn client(server: &MockServer, cache_dir: &Path) -> BrokerClient {
    let config = broker_config(server, cache_dir);
    BrokerClient::new(&config, server.uri())
        .unwrap()
        .with_retry_policy(fast_policy())
}

async fn mount_token(server: &MockServer, expected_issuances: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 86400
        })))
        .expect(expected_issuances)
        .mount(server)
        .await;
}

fn quote_body() -> serde_json::Value {
    json!({
        "code": "0",
        "message": "ok",
        "output": {
            "symbol": "005930",
            "price": "71200",
            "open": "70500",
            "high": "71500",
            "low": "70100",
            "prev_close": "70000",
            "change_rate": "0.0171",
            "volume": "13804520"
        }
    })
}

#[tokio::test]
async fn test_500_twice_then_success_takes_three_attempts() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(quote_body()))
        .expect(1)
        .mount(&server)
        .await;

    let quote = client(&server, dir.path()).quote("005930").await.unwrap();
    assert_eq!(quote.price, dec!(71200));
}

#[tokio::test]
async fn test_500_exhaustion_yields_transient() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    match client(&server, dir.path()).quote("005930").await {
        Err(BrokerError::Transient { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected transient error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_429_retries_then_succeeds() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(quote_body()))
        .expect(1)
        .mount(&server)
        .await;

    let quote = client(&server, dir.path()).quote("005930").await.unwrap();
    assert_eq!(quote.symbol, "005930");
}

#[tokio::test]
async fn test_401_twice_yields_auth_after_single_refresh() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    // Exactly two issuances: the initial token plus one forced refresh.
    mount_token(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    match client(&server, dir.path()).quote("005930").await {
        Err(BrokerError::Auth(_)) => {}
        other => panic!("expected auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_valid_token_reused_across_calls() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(quote_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, dir.path());
    client.quote("005930").await.unwrap();
    client.quote("005930").await.unwrap();
}

#[tokio::test]
async fn test_persisted_token_survives_restart() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(quote_body()))
        .expect(2)
        .mount(&server)
        .await;

    // First "process" issues and persists.
    client(&server, dir.path()).quote("005930").await.unwrap();
    // Second one reuses the disk cache instead of re-issuing.
    client(&server, dir.path()).quote("005930").await.unwrap();
}

#[tokio::test]
async fn test_unexpected_status_fails_fast() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such operation"))
        .expect(1)
        .mount(&server)
        .await;

    match client(&server, dir.path()).quote("005930").await {
        Err(BrokerError::Protocol { status, body, .. }) => {
            assert_eq!(status, 404);
            assert!(body.contains("no such operation"));
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_envelope_rejection_surfaces_code() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/quotations/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "90001",
            "message": "unknown symbol",
            "output": null
        })))
        .mount(&server)
        .await;

    match client(&server, dir.path()).quote("XXXXXX").await {
        Err(BrokerError::Rejected { code, message }) => {
            assert_eq!(code, "90001");
            assert_eq!(message, "unknown symbol");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_order_rejection_is_an_unaccepted_receipt() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "40310000",
            "message": "insufficient funds",
            "output": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let order = OrderRequest::market("005930", OrderSide::Buy, 10);
    let receipt = client(&server, dir.path())
        .submit_order(&order)
        .await
        .unwrap();

    assert!(!receipt.accepted);
    assert!(receipt.order_id.is_none());
    assert!(receipt.message.contains("40310000"));
}

#[tokio::test]
async fn test_token_issuance_cooldown_after_rate_limit() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(429).set_body_string("issuance limit"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "after-cooldown",
            "token_type": "Bearer",
            "expires_in": 86400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = broker_config(&server, dir.path());
    let manager = TokenManager::new(&config, &server.uri(), reqwest::Client::new())
        .with_retry_schedule(Duration::from_millis(5), Duration::from_millis(5));

    let token = manager.ensure_valid().await.unwrap();
    assert_eq!(token.value, "after-cooldown");
}

#[tokio::test]
async fn test_token_issuance_gives_up_as_auth_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid client"))
        .expect(3)
        .mount(&server)
        .await;

    let config = broker_config(&server, dir.path());
    let manager = TokenManager::new(&config, &server.uri(), reqwest::Client::new())
        .with_retry_schedule(Duration::from_millis(5), Duration::from_millis(5));

    match manager.ensure_valid().await {
        Err(BrokerError::Auth(message)) => assert!(message.contains("invalid client")),
        other => panic!("expected auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_refresh_single_issuance() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_token(&server, 1).await;

    let config = broker_config(&server, dir.path());
    let manager = std::sync::Arc::new(TokenManager::new(
        &config,
        &server.uri(),
        reqwest::Client::new(),
    ));

    // Both callers race; the second must wait on and reuse the in-flight
    // issuance rather than trigger a second one.
    let a = manager.clone();
    let b = manager.clone();
    let (ta, tb) = tokio::join!(a.ensure_valid(), b.ensure_valid());
    assert_eq!(ta.unwrap().value, tb.unwrap().value);
}
