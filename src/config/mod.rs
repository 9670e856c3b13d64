use serde::Deserialize;
use std::{env, fmt::Display, str::FromStr};
use thiserror::Error;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub mail: MailConfig,
    pub notifications: NotificationConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: String,
    /// Origin of the Next.js site, used for CORS and links in emails.
    pub frontend_url: String,
    /// Public base URL of this API, used for tracking pixels.
    pub public_api_url: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Настройки JWT
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_hours: i64,
}

// Настройки платежного шлюза (Airwallex)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub client_id: String,
    pub api_key: String,
    pub base_url: String,
    pub webhook_secret: String,
    /// Сколько минут бронь может висеть в `pending` до сверки с шлюзом.
    pub pending_timeout_minutes: i32,
    pub reconcile_interval_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Microsoft Graph mail settings
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub sender: String,
    pub authority_url: String,
    pub graph_url: String,
    pub token_cache_path: String,
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        !self.tenant_id.is_empty()
            && !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.sender.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub admin_email: String,
    pub corporate_email: String,
}

// Feature flags для включения/выключения функциональности
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_auth: bool,
    pub enable_email: bool,
    pub enable_reconciler: bool,
}

// Пустая строка в .env - то же, что отсутствие ключа.
fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let value = or_default(key, default);
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn positive<T>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + Display,
    T::Err: Display,
{
    let value: T = parsed(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: or_default("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000")?,
                environment: or_default("ENVIRONMENT", "development"),
                rust_log: or_default("RUST_LOG", "travel_booking=debug,tower_http=debug"),
                log_format: or_default("LOG_FORMAT", "pretty"),
                frontend_url: or_default("FRONTEND_URL", "http://localhost:3000"),
                public_api_url: or_default("PUBLIC_API_URL", "http://localhost:8000"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
            },
            jwt: JwtConfig {
                secret: required("JWT_SECRET")?,
                expires_in_hours: parsed("JWT_EXPIRES_IN_HOURS", "24")?,
            },
            payment: PaymentConfig {
                client_id: required("AIRWALLEX_CLIENT_ID")?,
                api_key: required("AIRWALLEX_API_KEY")?,
                base_url: or_default("AIRWALLEX_BASE_URL", "https://api-demo.airwallex.com"),
                webhook_secret: required("AIRWALLEX_WEBHOOK_SECRET")?,
                pending_timeout_minutes: positive("PENDING_TIMEOUT_MINUTES", "60")?,
                reconcile_interval_seconds: parsed("RECONCILE_INTERVAL_SECONDS", "300")?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
            mail: MailConfig {
                tenant_id: or_default("MS_TENANT_ID", ""),
                client_id: or_default("MS_CLIENT_ID", ""),
                client_secret: or_default("MS_CLIENT_SECRET", ""),
                sender: or_default("MAIL_SENDER", ""),
                authority_url: or_default("MS_AUTHORITY_URL", "https://login.microsoftonline.com"),
                graph_url: or_default("MS_GRAPH_URL", "https://graph.microsoft.com"),
                token_cache_path: or_default("MAIL_TOKEN_CACHE_PATH", ".mail-token-cache.json"),
            },
            notifications: NotificationConfig {
                admin_email: or_default("ADMIN_EMAIL", ""),
                corporate_email: or_default("CORPORATE_EMAIL", ""),
            },
            features: FeatureFlags {
                enable_auth: parsed("ENABLE_AUTH", "true")?,
                enable_email: parsed("ENABLE_EMAIL", "true")?,
                enable_reconciler: parsed("ENABLE_RECONCILER", "true")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_number_is_reported_with_key() {
        std::env::set_var("TB_TEST_BAD_PORT", "eighty");
        let err = parsed::<u16>("TB_TEST_BAD_PORT", "8000").unwrap_err();
        assert!(err.to_string().contains("TB_TEST_BAD_PORT"));
        assert!(err.to_string().contains("eighty"));
    }

    #[test]
    fn default_used_when_unset() {
        let port: u16 = parsed("TB_TEST_UNSET_PORT", "8123").unwrap();
        assert_eq!(port, 8123);
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        std::env::set_var("TB_TEST_BLANK_SECRET", "  ");
        let err = required("TB_TEST_BLANK_SECRET").unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TB_TEST_BLANK_SECRET")));

        std::env::set_var("TB_TEST_SET_SECRET", "whsec_1");
        assert_eq!(required("TB_TEST_SET_SECRET").unwrap(), "whsec_1");
    }

    #[test]
    fn timeout_minutes_must_fit_and_be_positive() {
        std::env::set_var("TB_TEST_TIMEOUT_ZERO", "0");
        let err = positive::<i32>("TB_TEST_TIMEOUT_ZERO", "60").unwrap_err();
        assert!(err.to_string().contains("must be greater than 0"));

        // За пределами i32 - ошибка разбора, а не молчаливое усечение.
        std::env::set_var("TB_TEST_TIMEOUT_HUGE", "4294967356");
        let err = positive::<i32>("TB_TEST_TIMEOUT_HUGE", "60").unwrap_err();
        assert!(err.to_string().contains("4294967356"));

        assert_eq!(positive::<i32>("TB_TEST_TIMEOUT_UNSET", "60").unwrap(), 60);
    }

    #[test]
    fn mail_is_optional() {
        let mail = MailConfig {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: String::new(),
            sender: "bookings@example.com".into(),
            authority_url: String::new(),
            graph_url: String::new(),
            token_cache_path: String::new(),
        };
        assert!(!mail.is_configured());
    }
}
