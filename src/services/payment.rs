//! payment.rs
//!
//! Сервисный слой для работы с платёжным процессором (Airwallex payment intents).
//!
//! Ключевые компоненты:
//! 1.  **CircuitBreaker**: обёртка над `failsafe`-автоматом, который перестаёт дёргать
//!     процессор после серии сетевых сбоев или 5xx ответов.
//! 2.  **PaymentGatewayClient**: клиент процессора. Получает и кеширует bearer-токен,
//!     создаёт, читает и отменяет payment intent'ы. Все вызовы идут через `CircuitBreaker`.
//! 3.  **Вебхуки**: проверка подписи `x-signature` и разбор событий процессора.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use failsafe::{
    backoff::{self, Constant},
    failure_policy::{self, ConsecutiveFailures},
    Config, Instrument, StateMachine,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::models::BookingStatus;

/// Состояния "Автоматического выключателя" (Circuit Breaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// **Closed (Замкнуто)**: нормальный режим, запросы разрешены.
    Closed,
    /// **Open (Разомкнуто)**: запросы запрещены до истечения таймаута.
    Open,
    /// **HalfOpen (Полуоткрыто)**: разрешён пробный запрос.
    HalfOpen,
}

impl CircuitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Наблюдатель за переходами автомата: логирует их и хранит текущее состояние для `/health`.
#[derive(Debug, Clone, Default)]
pub struct CircuitObserver {
    state: Arc<AtomicU8>,
}

impl CircuitObserver {
    fn set(&self, state: CircuitState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn get(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Relaxed))
    }
}

impl Instrument for CircuitObserver {
    fn on_call_rejected(&self) {
        warn!("Circuit breaker is OPEN - blocking payment provider request");
    }

    fn on_open(&self) {
        error!("Circuit breaker OPENED after consecutive payment provider failures");
        self.set(CircuitState::Open);
    }

    fn on_half_open(&self) {
        info!("Circuit breaker transitioning to HalfOpen state");
        self.set(CircuitState::HalfOpen);
    }

    fn on_closed(&self) {
        info!("Circuit breaker recovered - transitioning to Closed state");
        self.set(CircuitState::Closed);
    }
}

type BreakerMachine = StateMachine<ConsecutiveFailures<Constant>, CircuitObserver>;

/// "Автоматический выключатель" для платёжного процессора поверх `failsafe`:
/// `failure_threshold` сбоев подряд размыкают цепь на `timeout`, затем пробный запрос.
#[derive(Clone)]
pub struct CircuitBreaker {
    machine: BreakerMachine,
    observer: CircuitObserver,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        let observer = CircuitObserver::default();
        let policy =
            failure_policy::consecutive_failures(failure_threshold.max(1), backoff::constant(timeout));
        let machine = Config::new()
            .failure_policy(policy)
            .instrument(observer.clone())
            .build();
        Self { machine, observer }
    }

    /// Можно ли выполнить следующий запрос. В Open по истечении таймаута переводит в HalfOpen.
    pub fn is_call_permitted(&self) -> bool {
        self.machine.is_call_permitted()
    }

    pub fn record_success(&self) {
        self.machine.on_success();
    }

    pub fn record_failure(&self) {
        self.machine.on_error();
    }

    pub fn state(&self) -> CircuitState {
        self.observer.get()
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider temporarily unavailable (circuit open)")]
    CircuitOpen,
    #[error("payment provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Процессор отклонил запрос (4xx). `message` - текст процессора.
    #[error("{message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },
    #[error("payment provider rejected credentials: {0}")]
    Unauthorized(String),
    #[error("payment provider returned {status}: {message}")]
    Upstream { status: u16, message: String },
}

// --- Модели API процессора ---

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateIntentRequest<'a> {
    request_id: String,
    amount: f64,
    currency: &'a str,
    merchant_order_id: &'a str,
    descriptor: &'a str,
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CancelIntentRequest<'a> {
    request_id: String,
    cancellation_reason: &'a str,
}

/// Статус payment intent на стороне процессора.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresCustomerAction,
    RequiresCapture,
    Pending,
    Succeeded,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    /// Во что превращается локальная бронь при таком статусе intent'а.
    /// `None` - оплата ещё не завершена.
    pub fn booking_outcome(&self) -> Option<BookingStatus> {
        match self {
            IntentStatus::Succeeded => Some(BookingStatus::Confirmed),
            IntentStatus::Cancelled => Some(BookingStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub merchant_order_id: Option<String>,
}

/// Параметры создания intent'а для брони.
#[derive(Debug, Clone)]
pub struct NewIntent<'a> {
    pub amount: f64,
    pub currency: &'a str,
    pub booking_reference: &'a str,
    pub package_id: i64,
    pub description: &'a str,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(60) > now
    }
}

/// Клиент для взаимодействия с API платёжного процессора.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    client_id: String,
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    token: Arc<tokio::sync::Mutex<Option<AccessToken>>>,
}

impl PaymentGatewayClient {
    pub fn from_config(
        config: &PaymentConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client_id: config.client_id.clone(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
            circuit_breaker: CircuitBreaker::new(
                breaker.failure_threshold,
                Duration::from_secs(breaker.timeout_seconds),
            ),
            token: Arc::new(tokio::sync::Mutex::new(None)),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Выполняет запрос через Circuit Breaker. Сбоем считаются сетевые ошибки
    /// и 5xx; бизнес-отказы (4xx) выключатель не трогают.
    async fn execute_with_circuit_breaker<T>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PaymentError>
    where
        T: serde::de::DeserializeOwned,
    {
        if !self.circuit_breaker.is_call_permitted() {
            return Err(PaymentError::CircuitOpen);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Payment provider request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                return Err(PaymentError::Transport(e));
            }
        };

        let status = response.status();
        if status.is_server_error() {
            self.circuit_breaker.record_failure();
            let message = response.text().await.unwrap_or_default();
            return Err(PaymentError::Upstream { status: status.as_u16(), message });
        }

        self.circuit_breaker.record_success();

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let parsed: Option<ProviderErrorBody> = serde_json::from_str(&body).ok();
            let (code, message) = match parsed {
                Some(err) => (err.code, err.message.unwrap_or(body)),
                None => (None, body),
            };
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(PaymentError::Unauthorized(message));
            }
            return Err(PaymentError::Rejected { code, message });
        }

        Ok(response.json::<T>().await?)
    }

    /// Возвращает действующий bearer-токен, при необходимости логинится заново.
    async fn bearer_token(&self) -> Result<String, PaymentError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        info!("Requesting new payment provider access token");
        let request = self
            .http_client
            .post(format!("{}/api/v1/authentication/login", self.base_url))
            .header("x-client-id", &self.client_id)
            .header("x-api-key", &self.api_key);
        let login: LoginResponse = self.execute_with_circuit_breaker(request).await?;

        let expires_at = login
            .expires_at
            .as_deref()
            .and_then(parse_provider_timestamp)
            .unwrap_or_else(|| Utc::now() + ChronoDuration::minutes(25));

        let value = login.token.clone();
        *cached = Some(AccessToken { value: login.token, expires_at });
        Ok(value)
    }

    /// Запрос с bearer-токеном. Если процессор отверг токен, кеш сбрасывается,
    /// и следующий вызов залогинится заново.
    async fn send_authorized<T>(&self, request: reqwest::RequestBuilder) -> Result<T, PaymentError>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.bearer_token().await?;
        let result = self.execute_with_circuit_breaker(request.bearer_auth(token)).await;
        if let Err(PaymentError::Unauthorized(_)) = &result {
            warn!("Payment provider rejected cached token, dropping it");
            self.token.lock().await.take();
        }
        result
    }

    /// Создаёт payment intent для брони.
    pub async fn create_payment_intent(&self, intent: NewIntent<'_>) -> Result<PaymentIntent, PaymentError> {
        let body = CreateIntentRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            amount: round_amount(intent.amount),
            currency: intent.currency,
            merchant_order_id: intent.booking_reference,
            descriptor: intent.description,
            metadata: serde_json::json!({
                "booking_reference": intent.booking_reference,
                "package_id": intent.package_id,
            }),
        };

        info!(
            "Creating payment intent: order={}, amount={}, currency={}, breaker={:?}",
            intent.booking_reference,
            body.amount,
            intent.currency,
            self.circuit_breaker.state()
        );

        let request = self
            .http_client
            .post(format!("{}/api/v1/pa/payment_intents/create", self.base_url))
            .json(&body);
        self.send_authorized(request).await
    }

    /// Читает актуальный статус intent'а.
    pub async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError> {
        let request = self
            .http_client
            .get(format!("{}/api/v1/pa/payment_intents/{}", self.base_url, intent_id));
        self.send_authorized(request).await
    }

    /// Отменяет intent (используется при сбое записи брони и при истечении ожидания).
    pub async fn cancel_payment_intent(
        &self,
        intent_id: &str,
        reason: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let body = CancelIntentRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            cancellation_reason: reason,
        };
        let request = self
            .http_client
            .post(format!("{}/api/v1/pa/payment_intents/{}/cancel", self.base_url, intent_id))
            .json(&body);
        self.send_authorized(request).await
    }
}

fn round_amount(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Процессор отдаёт время и в RFC 3339, и в виде `2024-06-01T10:00:00+0000`.
fn parse_provider_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// --- Вебхуки ---

type HmacSha256 = Hmac<Sha256>;

/// Проверяет подпись вебхука: hex(HMAC-SHA256(secret, timestamp + body)).
pub fn verify_webhook_signature(secret: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Допустимое расхождение `x-timestamp` (миллисекунды epoch) с текущим временем.
pub const WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

/// Подписанный `x-timestamp` не старше и не "моложе" `WEBHOOK_TOLERANCE_SECONDS`.
pub fn webhook_timestamp_is_fresh(timestamp: &str, now: DateTime<Utc>) -> bool {
    let Ok(millis) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    let skew = (now.timestamp_millis() - millis).abs();
    skew <= WEBHOOK_TOLERANCE_SECONDS * 1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub name: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// ID intent'а, к которому относится событие. У событий `payment_attempt.*`
    /// объект - попытка оплаты, и intent лежит в `payment_intent_id`.
    pub fn intent_id(&self) -> Option<&str> {
        if let Some(id) = self.data.object.get("payment_intent_id").and_then(|v| v.as_str()) {
            return Some(id);
        }
        if self.name.starts_with("payment_intent.") {
            return self.data.object.get("id").and_then(|v| v.as_str());
        }
        None
    }

    /// Итоговый статус брони для события, `None` - событие не меняет бронь.
    pub fn booking_outcome(&self) -> Option<BookingStatus> {
        match self.name.as_str() {
            "payment_intent.succeeded" => Some(BookingStatus::Confirmed),
            "payment_intent.failed" | "payment_intent.cancelled" => Some(BookingStatus::Failed),
            // В т.ч. `payment_attempt.*`: неудачная попытка не завершает intent,
            // клиент может повторить оплату.
            _ => None,
        }
    }
}
