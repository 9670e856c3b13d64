use serde_json::json;
use travel_booking::config::{CircuitBreakerConfig, PaymentConfig};
use travel_booking::services::payment::{
    CircuitState, IntentStatus, NewIntent, PaymentError, PaymentGatewayClient,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN: &str = "/api/v1/authentication/login";

fn client(server: &MockServer, failure_threshold: u32) -> PaymentGatewayClient {
    let payment = PaymentConfig {
        client_id: "client-1".into(),
        api_key: "key-1".into(),
        base_url: server.uri(),
        webhook_secret: "whsec".into(),
        pending_timeout_minutes: 60,
        reconcile_interval_seconds: 300,
    };
    let breaker = CircuitBreakerConfig { failure_threshold, timeout_seconds: 60 };
    PaymentGatewayClient::from_config(&payment, &breaker).unwrap()
}

async fn mount_login(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .and(header("x-client-id", "client-1"))
        .and(header("x-api-key", "key-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": token,
            "expires_at": "2099-01-01T00:00:00+0000"
        })))
        .expect(times)
        .mount(server)
        .await;
}

fn intent(reference: &str) -> NewIntent<'_> {
    NewIntent {
        amount: 2499.999,
        currency: "USD",
        booking_reference: reference,
        package_id: 7,
        description: "Kenya Safari x2",
    }
}

#[tokio::test]
async fn login_once_and_reuse_token_for_intents() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/pa/payment_intents/create"))
        .and(header("authorization", "Bearer tok-1"))
        .and(body_partial_json(json!({
            "amount": 2500.0,
            "currency": "USD",
            "merchant_order_id": "TB-ABC123",
            "metadata": { "booking_reference": "TB-ABC123", "package_id": 7 }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "int_1",
            "client_secret": "secret_1",
            "status": "REQUIRES_PAYMENT_METHOD",
            "amount": 2500.0,
            "currency": "USD"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let payments = client(&server, 5);
    let first = payments.create_payment_intent(intent("TB-ABC123")).await.unwrap();
    let second = payments.create_payment_intent(intent("TB-ABC123")).await.unwrap();

    assert_eq!(first.id, "int_1");
    assert_eq!(first.client_secret.as_deref(), Some("secret_1"));
    assert_eq!(second.status, IntentStatus::RequiresPaymentMethod);
}

#[tokio::test]
async fn provider_rejection_message_is_passed_through() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/pa/payment_intents/create"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "validation_error",
            "message": "The amount is below the minimum"
        })))
        .mount(&server)
        .await;

    let payments = client(&server, 5);
    let err = payments.create_payment_intent(intent("TB-XYZ789")).await.unwrap_err();

    match err {
        PaymentError::Rejected { code, message } => {
            assert_eq!(code.as_deref(), Some("validation_error"));
            assert_eq!(message, "The amount is below the minimum");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // 4xx - бизнес-отказ, выключатель остаётся замкнутым
    assert_eq!(payments.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn server_errors_open_the_circuit() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/pa/payment_intents/int_9"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(2)
        .mount(&server)
        .await;

    let payments = client(&server, 2);
    for _ in 0..2 {
        let err = payments.retrieve_payment_intent("int_9").await.unwrap_err();
        assert!(matches!(err, PaymentError::Upstream { status: 503, .. }));
    }

    assert_eq!(payments.circuit_breaker().state(), CircuitState::Open);
    let err = payments.retrieve_payment_intent("int_9").await.unwrap_err();
    assert!(matches!(err, PaymentError::CircuitOpen));
}

#[tokio::test]
async fn rejected_token_is_dropped_and_refreshed() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 2).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/pa/payment_intents/int_5"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "unauthorized",
            "message": "token expired"
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/pa/payment_intents/int_5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "int_5",
            "status": "SUCCEEDED"
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let payments = client(&server, 5);
    let err = payments.retrieve_payment_intent("int_5").await.unwrap_err();
    assert!(matches!(err, PaymentError::Unauthorized(_)));

    let intent = payments.retrieve_payment_intent("int_5").await.unwrap();
    assert_eq!(intent.status, IntentStatus::Succeeded);
}

#[tokio::test]
async fn cancel_sends_reason() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/pa/payment_intents/int_3/cancel"))
        .and(body_partial_json(json!({ "cancellation_reason": "EXPIRED" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "int_3",
            "status": "CANCELLED"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payments = client(&server, 5);
    let intent = payments.cancel_payment_intent("int_3", "EXPIRED").await.unwrap();
    assert_eq!(intent.status, IntentStatus::Cancelled);
}
