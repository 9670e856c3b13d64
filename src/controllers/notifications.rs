use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, info, warn};

use crate::error::ApiResult;
use crate::middleware::{authorize_admin, AdminUser};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/notifications", get(notifications_socket))
        .route("/admin/notifications/stats", get(notification_stats))
}

#[derive(Debug, Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

// GET /api/admin/notifications (WebSocket)
// Браузерный WebSocket не умеет заголовки, поэтому токен приходит в query.
async fn notifications_socket(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    let admin = authorize_admin(&state, query.token.as_deref()).await?;
    let who = admin
        .user
        .map(|u| u.email)
        .unwrap_or_else(|| "anonymous".to_string());

    // Подписываемся до апгрейда, чтобы не потерять события между ответом и стартом задачи
    let rx = state.notifier.subscribe();
    Ok(ws.on_upgrade(move |socket| forward_notifications(socket, rx, who)))
}

async fn forward_notifications(socket: WebSocket, mut rx: Receiver<String>, who: String) {
    info!("📡 Admin {} connected to notifications", who);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        debug!("Admin {} socket closed during send", who);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Отставший подписчик выкидывается, клиент переподключится
                    warn!("Admin {} lagged behind by {} notifications, closing", who, skipped);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Admin {} socket error: {}", who, e);
                    break;
                }
            },
        }
    }

    info!("📡 Admin {} disconnected from notifications", who);
}

// GET /api/admin/notifications/stats
async fn notification_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(json!({
        "success": true,
        "connected_admins": state.notifier.connected(),
    })))
}
