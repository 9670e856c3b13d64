use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Подписывает адрес. Повторная подписка реактивирует запись.
    /// Второй элемент кортежа - `true`, если адрес раньше не был активен.
    pub async fn subscribe(pool: &PgPool, email: &str) -> Result<(Subscription, bool), sqlx::Error> {
        let was_active = sqlx::query_scalar::<_, bool>(
            "SELECT is_active FROM subscriptions WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(pool)
        .await?
        .unwrap_or(false);

        let subscription = sqlx::query_as::<_, Subscription>(
            "INSERT INTO subscriptions (email) VALUES (lower($1))
             ON CONFLICT (email) DO UPDATE SET is_active = TRUE, unsubscribed_at = NULL
             RETURNING *",
        )
        .bind(email)
        .fetch_one(pool)
        .await?;

        Ok((subscription, !was_active))
    }

    pub async fn unsubscribe(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscriptions SET is_active = FALSE, unsubscribed_at = NOW()
             WHERE email = lower($1) AND is_active",
        )
        .bind(email)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(
        pool: &PgPool,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions
             WHERE (NOT $1 OR is_active)
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(active_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}
