//! mail.rs
//!
//! Отправка писем через Microsoft Graph.
//!
//! 1.  Токен приложения (OAuth2 client credentials) кешируется в памяти и в JSON-файле
//!     `{access_token, expires_at}` и переиспользуется до момента за 60 секунд до истечения.
//!     Кеш закрыт асинхронным мьютексом, поэтому внутри процесса токен запрашивается один раз.
//! 2.  В каждое письмо вставляется пиксель `/api/tracking/{id}/open.gif`, а после успешной
//!     отправки в `email_tracking` пишется строка с этим id.
//! 3.  Очереди и повторов нет: `dispatch` отправляет письмо в фоне и только логирует ошибку.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MailConfig;
use crate::models::EmailTracking;
use crate::services::templates::Email;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {message}")]
    Token { status: u16, message: String },
    #[error("graph sendMail returned {status}: {message}")]
    Graph { status: u16, message: String },
    #[error("failed to encode token request: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
    #[error("failed to record email tracking: {0}")]
    Tracking(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(60) > now
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    scope: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Письмо, готовое к отправке. `kind` попадает в `email_tracking.kind`.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub kind: &'static str,
    pub attachments: Vec<Attachment>,
}

impl OutgoingEmail {
    pub fn new(to: impl Into<String>, kind: &'static str, email: Email) -> Self {
        Self {
            to: to.into(),
            subject: email.subject,
            html: email.html,
            kind,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Результат отправки: письмо ушло с пикселем `tracking_id`.
#[derive(Debug, Clone, Copy)]
pub struct Sent {
    pub tracking_id: Uuid,
}

#[derive(Clone)]
pub struct MailService {
    config: MailConfig,
    enabled: bool,
    public_api_url: String,
    http_client: reqwest::Client,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl MailService {
    pub fn new(config: &MailConfig, enabled: bool, public_api_url: &str) -> Result<Self, MailError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            config: config.clone(),
            enabled: enabled && config.is_configured(),
            public_api_url: public_api_url.trim_end_matches('/').to_string(),
            http_client,
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn cache_path(&self) -> Option<PathBuf> {
        let path = self.config.token_cache_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    /// Действующий токен Graph: память, затем файл, затем запрос к authority.
    pub async fn access_token(&self) -> Result<String, MailError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        if let Some(path) = self.cache_path() {
            if let Some(token) = read_token_file(&path).await.filter(|t| t.is_fresh(now)) {
                debug!("Mail token loaded from {}", path.display());
                let value = token.access_token.clone();
                *cached = Some(token);
                return Ok(value);
            }
        }

        let token = self.request_token().await?;
        if let Some(path) = self.cache_path() {
            write_token_file(&path, &token).await;
        }
        let value = token.access_token.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Graph отверг токен: забываем его и в памяти, и в файле кеша,
    /// иначе следующий вызов поднимет тот же токен из файла.
    async fn invalidate_token(&self) {
        let mut cached = self.token.lock().await;
        cached.take();
        if let Some(path) = self.cache_path() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => warn!("Graph rejected cached token, removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove mail token cache {}: {}", path.display(), e),
            }
        }
    }

    async fn request_token(&self) -> Result<CachedToken, MailError> {
        info!("Requesting new Graph access token");
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_url.trim_end_matches('/'),
            self.config.tenant_id
        );
        let body = serde_urlencoded::to_string(TokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            scope: GRAPH_SCOPE,
            grant_type: "client_credentials",
        })?;

        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Token { status: status.as_u16(), message });
        }

        let token: TokenResponse = response.json().await?;
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        })
    }

    /// Отправляет письмо. `Ok(None)` - почта выключена или не настроена.
    pub async fn send(&self, email: &OutgoingEmail) -> Result<Option<Sent>, MailError> {
        if !self.enabled {
            info!("Mail disabled, skipping '{}' to {}", email.subject, email.to);
            return Ok(None);
        }

        let tracking_id = Uuid::new_v4();
        let html = inject_tracking_pixel(&email.html, &self.tracking_pixel_url(tracking_id));

        let attachments: Vec<serde_json::Value> = email
            .attachments
            .iter()
            .map(|a| {
                json!({
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": a.name,
                    "contentType": a.content_type,
                    "contentBytes": general_purpose::STANDARD.encode(&a.bytes),
                })
            })
            .collect();

        let payload = json!({
            "message": {
                "subject": email.subject,
                "body": { "contentType": "HTML", "content": html },
                "toRecipients": [ { "emailAddress": { "address": email.to } } ],
                "attachments": attachments,
            },
            "saveToSentItems": false,
        });

        let token = self.access_token().await?;
        let url = format!(
            "{}/v1.0/users/{}/sendMail",
            self.config.graph_url.trim_end_matches('/'),
            self.config.sender
        );
        let response = self
            .http_client
            .post(url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.invalidate_token().await;
            }
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Graph { status: status.as_u16(), message });
        }

        info!("Email '{}' sent to {}", email.subject, email.to);
        Ok(Some(Sent { tracking_id }))
    }

    /// Отправка + запись в `email_tracking`.
    pub async fn deliver(&self, pool: &PgPool, email: &OutgoingEmail) -> Result<Option<Sent>, MailError> {
        let sent = self.send(email).await?;
        if let Some(sent) = sent {
            EmailTracking::record_sent(pool, sent.tracking_id, &email.to, &email.subject, email.kind)
                .await?;
        }
        Ok(sent)
    }

    /// Отправляет письмо в фоне. Ошибка логируется и не влияет на HTTP-ответ.
    pub fn dispatch(&self, pool: PgPool, email: OutgoingEmail) {
        if email.to.trim().is_empty() {
            debug!("No recipient for '{}', skipping", email.subject);
            return;
        }
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.deliver(&pool, &email).await {
                error!("Failed to send '{}' to {}: {}", email.subject, email.to, e);
            }
        });
    }

    fn tracking_pixel_url(&self, tracking_id: Uuid) -> String {
        format!("{}/api/tracking/{}/open.gif", self.public_api_url, tracking_id)
    }
}

async fn read_token_file(path: &PathBuf) -> Option<CachedToken> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Mail token cache {} unreadable: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("Mail token cache {} is corrupt, ignoring: {}", path.display(), e);
            None
        }
    }
}

async fn write_token_file(path: &PathBuf, token: &CachedToken) {
    let data = match serde_json::to_vec(token) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to serialize mail token: {}", e);
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, data).await {
        warn!("Failed to write mail token cache {}: {}", path.display(), e);
    }
}

/// Вставляет пиксель перед `</body>`, а если его нет - в конец письма.
pub fn inject_tracking_pixel(html: &str, pixel_url: &str) -> String {
    let img = format!(
        "<img src=\"{}\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none\">",
        pixel_url
    );
    match html.rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], img, &html[pos..]),
        None => format!("{}{}", html, img),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_goes_before_closing_body() {
        let html = inject_tracking_pixel("<html><body><p>Hi</p></body></html>", "https://api/p.gif");
        assert_eq!(
            html,
            "<html><body><p>Hi</p><img src=\"https://api/p.gif\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none\"></body></html>"
        );
        assert!(inject_tracking_pixel("<p>plain</p>", "x").ends_with("style=\"display:none\">"));
    }

    #[test]
    fn token_expires_a_minute_early() {
        let now = Utc::now();
        let token = CachedToken { access_token: "t".into(), expires_at: now + ChronoDuration::seconds(90) };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + ChronoDuration::seconds(31)));
    }

    #[tokio::test]
    async fn corrupt_cache_file_is_a_miss() {
        let path = std::env::temp_dir().join(format!("mail-token-{}.json", Uuid::new_v4()));
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(read_token_file(&path).await.is_none());

        let token = CachedToken { access_token: "abc".into(), expires_at: Utc::now() };
        write_token_file(&path, &token).await;
        assert_eq!(read_token_file(&path).await, Some(token));
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn disabled_mailer_is_a_no_op() {
        let config = MailConfig {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            sender: String::new(),
            authority_url: "http://127.0.0.1:9".into(),
            graph_url: "http://127.0.0.1:9".into(),
            token_cache_path: String::new(),
        };
        let mailer = MailService::new(&config, true, "http://localhost:8000").unwrap();
        assert!(!mailer.is_enabled());
        let email = OutgoingEmail::new(
            "a@example.com",
            "test",
            Email { subject: "s".into(), html: "<p>x</p>".into() },
        );
        assert!(mailer.send(&email).await.unwrap().is_none());
    }
}
