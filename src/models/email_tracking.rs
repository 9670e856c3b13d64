use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EmailTracking {
    pub id: i64,
    pub tracking_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub kind: String,
    pub sent_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_count: i32,
}

impl EmailTracking {
    pub async fn record_sent(
        pool: &PgPool,
        tracking_id: Uuid,
        recipient: &str,
        subject: &str,
        kind: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO email_tracking (tracking_id, recipient, subject, kind)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(tracking_id)
        .bind(recipient)
        .bind(subject)
        .bind(kind)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Отмечает открытие письма. Первое открытие фиксирует `opened_at`.
    pub async fn record_open(pool: &PgPool, tracking_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE email_tracking
             SET open_count = open_count + 1, opened_at = COALESCE(opened_at, NOW())
             WHERE tracking_id = $1",
        )
        .bind(tracking_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<EmailTracking>, sqlx::Error> {
        sqlx::query_as::<_, EmailTracking>(
            "SELECT * FROM email_tracking ORDER BY sent_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}
