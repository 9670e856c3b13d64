use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::path::PathBuf;
use travel_booking::config::MailConfig;
use travel_booking::services::mail::{Attachment, CachedToken, MailError, MailService, OutgoingEmail};
use travel_booking::services::templates::Email;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";
const SEND_PATH: &str = r"^/v1\.0/users/[^/]+/sendMail$";

fn temp_cache() -> PathBuf {
    std::env::temp_dir().join(format!("graph-token-{}.json", Uuid::new_v4()))
}

fn mailer(server: &MockServer, cache: Option<&PathBuf>) -> MailService {
    let config = MailConfig {
        tenant_id: "tenant-1".into(),
        client_id: "app-1".into(),
        client_secret: "s3cret".into(),
        sender: "bookings@example.com".into(),
        authority_url: server.uri(),
        graph_url: server.uri(),
        token_cache_path: cache.map(|p| p.display().to_string()).unwrap_or_default(),
    };
    MailService::new(&config, true, "https://api.example.com/").unwrap()
}

async fn mount_token(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=app-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": token
        })))
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_send(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path_regex(SEND_PATH))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(202))
        .expect(times)
        .mount(server)
        .await;
}

fn email(to: &str) -> OutgoingEmail {
    OutgoingEmail::new(
        to,
        "booking_confirmation",
        Email {
            subject: "Your booking TB-ABC123".into(),
            html: "<html><body><p>Thanks!</p></body></html>".into(),
        },
    )
}

#[tokio::test]
async fn token_is_requested_once_and_reused() {
    let server = MockServer::start().await;
    mount_token(&server, "graph-1", 1).await;
    mount_send(&server, "graph-1", 2).await;

    let mail = mailer(&server, None);
    assert!(mail.send(&email("a@example.com")).await.unwrap().is_some());
    assert!(mail.send(&email("b@example.com")).await.unwrap().is_some());
}

#[tokio::test]
async fn file_cache_is_shared_between_instances() {
    let server = MockServer::start().await;
    let cache = temp_cache();
    mount_token(&server, "graph-1", 1).await;
    mount_send(&server, "graph-1", 2).await;

    mailer(&server, Some(&cache)).send(&email("a@example.com")).await.unwrap();

    let stored: CachedToken = serde_json::from_slice(&tokio::fs::read(&cache).await.unwrap()).unwrap();
    assert_eq!(stored.access_token, "graph-1");
    assert!(stored.is_fresh(Utc::now()));

    // Новый процесс поднимает токен из файла, не ходя в authority
    mailer(&server, Some(&cache)).send(&email("b@example.com")).await.unwrap();
    tokio::fs::remove_file(&cache).await.ok();
}

#[tokio::test]
async fn expired_file_token_is_refreshed() {
    let server = MockServer::start().await;
    let cache = temp_cache();
    let stale = CachedToken {
        access_token: "old".into(),
        expires_at: Utc::now() + Duration::seconds(30),
    };
    tokio::fs::write(&cache, serde_json::to_vec(&stale).unwrap()).await.unwrap();

    mount_token(&server, "graph-2", 1).await;
    mount_send(&server, "graph-2", 1).await;

    let mail = mailer(&server, Some(&cache));
    assert_eq!(mail.access_token().await.unwrap(), "graph-2");
    mail.send(&email("a@example.com")).await.unwrap();

    let stored: CachedToken = serde_json::from_slice(&tokio::fs::read(&cache).await.unwrap()).unwrap();
    assert_eq!(stored.access_token, "graph-2");
    tokio::fs::remove_file(&cache).await.ok();
}

#[tokio::test]
async fn send_mail_carries_pixel_and_attachment() {
    let server = MockServer::start().await;
    mount_token(&server, "graph-1", 1).await;
    mount_send(&server, "graph-1", 1).await;

    let outgoing = email("traveller@example.com").with_attachment(Attachment {
        name: "booking-TB-ABC123.html".into(),
        content_type: "text/html".into(),
        bytes: b"<h1>Confirmed</h1>".to_vec(),
    });
    let sent = mailer(&server, None).send(&outgoing).await.unwrap().unwrap();

    let requests = server.received_requests().await.unwrap();
    let send = requests
        .iter()
        .find(|r| r.url.path().ends_with("/sendMail"))
        .expect("sendMail was called");
    let body: Value = serde_json::from_slice(&send.body).unwrap();
    let message = &body["message"];

    assert_eq!(message["subject"], "Your booking TB-ABC123");
    assert_eq!(message["toRecipients"][0]["emailAddress"]["address"], "traveller@example.com");

    let html = message["body"]["content"].as_str().unwrap();
    let pixel = format!("https://api.example.com/api/tracking/{}/open.gif", sent.tracking_id);
    assert!(html.contains(&pixel));
    assert!(html.find(&pixel).unwrap() < html.find("</body>").unwrap());

    let attachment = &message["attachments"][0];
    assert_eq!(attachment["name"], "booking-TB-ABC123.html");
    assert_eq!(
        attachment["contentBytes"],
        general_purpose::STANDARD.encode("<h1>Confirmed</h1>")
    );
}

#[tokio::test]
async fn graph_401_drops_cached_token() {
    let server = MockServer::start().await;
    mount_token(&server, "graph-1", 2).await;

    Mock::given(method("POST"))
        .and(path_regex(SEND_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("InvalidAuthenticationToken"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(SEND_PATH))
        .respond_with(ResponseTemplate::new(202))
        .with_priority(2)
        .mount(&server)
        .await;

    let mail = mailer(&server, None);
    let err = mail.send(&email("a@example.com")).await.unwrap_err();
    assert!(matches!(err, MailError::Graph { status: 401, .. }));

    assert!(mail.send(&email("a@example.com")).await.unwrap().is_some());
}

#[tokio::test]
async fn graph_401_also_drops_token_file() {
    let server = MockServer::start().await;
    let cache = temp_cache();
    let revoked = CachedToken {
        access_token: "revoked".into(),
        expires_at: Utc::now() + Duration::hours(1),
    };
    tokio::fs::write(&cache, serde_json::to_vec(&revoked).unwrap()).await.unwrap();

    Mock::given(method("POST"))
        .and(path_regex(SEND_PATH))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401).set_body_string("InvalidAuthenticationToken"))
        .expect(1)
        .mount(&server)
        .await;
    mount_token(&server, "graph-3", 1).await;
    mount_send(&server, "graph-3", 1).await;

    let mail = mailer(&server, Some(&cache));
    let err = mail.send(&email("a@example.com")).await.unwrap_err();
    assert!(matches!(err, MailError::Graph { status: 401, .. }));

    assert!(mail.send(&email("a@example.com")).await.unwrap().is_some());

    let stored: CachedToken = serde_json::from_slice(&tokio::fs::read(&cache).await.unwrap()).unwrap();
    assert_eq!(stored.access_token, "graph-3");
    tokio::fs::remove_file(&cache).await.ok();
}
