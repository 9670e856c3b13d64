use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;

/// Статус бронирования.
///
/// `pending` переходит в `confirmed` или `failed` по результату оплаты;
/// администратор может отменить `pending` или `confirmed` бронь.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Failed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Failed => "failed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Статусы, из которых допустим переход в `self`.
    pub fn allowed_sources(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[],
            BookingStatus::Confirmed | BookingStatus::Failed => &[BookingStatus::Pending],
            BookingStatus::Cancelled => &[BookingStatus::Pending, BookingStatus::Confirmed],
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        next.allowed_sources().contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Failed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "failed" => Ok(BookingStatus::Failed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status '{}'", other)),
        }
    }
}

impl TryFrom<String> for BookingStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: i64,
    pub reference: String,
    pub package_id: i64,
    pub user_id: Option<i64>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub travel_date: Option<NaiveDate>,
    pub travellers: i32,
    pub total_amount: f64,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub status: BookingStatus,
    pub payment_intent_id: Option<String>,
    pub passenger_details: serde_json::Value,
    pub contact_details: serde_json::Value,
    pub special_requests: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Данные для вставки новой брони.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub reference: String,
    pub package_id: i64,
    pub user_id: Option<i64>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub travel_date: Option<NaiveDate>,
    pub travellers: i32,
    pub total_amount: f64,
    pub currency: String,
    pub payment_intent_id: Option<String>,
    pub passenger_details: serde_json::Value,
    pub contact_details: serde_json::Value,
    pub special_requests: Option<String>,
}

const BOOKING_COLUMNS: &str = "id, reference, package_id, user_id, customer_name, customer_email, \
     customer_phone, travel_date, travellers, total_amount::float8 AS total_amount, currency, \
     status, payment_intent_id, passenger_details, contact_details, special_requests, \
     created_at, updated_at";

/// Human-friendly booking reference, e.g. `BK-3F9A1C2E`.
pub fn generate_reference() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("BK-{}", id[..8].to_uppercase())
}

impl Booking {
    pub async fn insert(pool: &PgPool, new: &NewBooking) -> Result<Booking, sqlx::Error> {
        let sql = format!(
            "INSERT INTO bookings (reference, package_id, user_id, customer_name, customer_email, \
             customer_phone, travel_date, travellers, total_amount, currency, status, \
             payment_intent_id, passenger_details, contact_details, special_requests) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $12, $13, $14) \
             RETURNING {}",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, Booking>(&sql)
            .bind(&new.reference)
            .bind(new.package_id)
            .bind(new.user_id)
            .bind(&new.customer_name)
            .bind(&new.customer_email)
            .bind(&new.customer_phone)
            .bind(new.travel_date)
            .bind(new.travellers)
            .bind(new.total_amount)
            .bind(&new.currency)
            .bind(&new.payment_intent_id)
            .bind(&new.passenger_details)
            .bind(&new.contact_details)
            .bind(&new.special_requests)
            .fetch_one(pool)
            .await
    }

    pub async fn find(pool: &PgPool, id: i64) -> Result<Option<Booking>, sqlx::Error> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        sqlx::query_as::<_, Booking>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_intent(
        pool: &PgPool,
        payment_intent_id: &str,
    ) -> Result<Option<Booking>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE payment_intent_id = $1",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, Booking>(&sql)
            .bind(payment_intent_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &PgPool,
        status: Option<BookingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Booking>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM bookings \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, Booking>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Booking>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, Booking>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Переводит бронь в `to`, только если текущий статус допускает переход.
    /// Возвращает `None`, если бронь не найдена или уже в другом статусе.
    pub async fn transition(
        pool: &PgPool,
        id: i64,
        to: BookingStatus,
    ) -> Result<Option<Booking>, sqlx::Error> {
        let sources: Vec<&str> = to.allowed_sources().iter().map(|s| s.as_str()).collect();
        let sql = format!(
            "UPDATE bookings SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($3) \
             RETURNING {}",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, Booking>(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(&sources)
            .fetch_optional(pool)
            .await
    }

    /// Брони, которые висят в `pending` дольше `older_than_minutes` и имеют платёжный intent.
    pub async fn stale_pending(
        pool: &PgPool,
        older_than_minutes: i32,
    ) -> Result<Vec<Booking>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM bookings \
             WHERE status = 'pending' \
               AND payment_intent_id IS NOT NULL \
               AND created_at < NOW() - make_interval(mins => $1) \
             ORDER BY created_at",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, Booking>(&sql)
            .bind(older_than_minutes)
            .fetch_all(pool)
            .await
    }

    pub fn belongs_to(&self, user_id: i64) -> bool {
        self.user_id == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_resolves_to_confirmed_or_failed() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Confirmed));
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Failed));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Pending));
    }

    #[test]
    fn terminal_statuses_never_move() {
        for from in [BookingStatus::Failed, BookingStatus::Cancelled] {
            assert!(from.is_terminal());
            for to in [
                BookingStatus::Pending,
                BookingStatus::Confirmed,
                BookingStatus::Failed,
                BookingStatus::Cancelled,
            ] {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn late_failure_cannot_overwrite_confirmation() {
        assert!(!BookingStatus::Confirmed.can_transition_to(BookingStatus::Failed));
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::Cancelled));
    }

    #[test]
    fn status_parses_from_db_text() {
        assert_eq!("confirmed".parse::<BookingStatus>(), Ok(BookingStatus::Confirmed));
        assert!(BookingStatus::try_from("paid".to_string()).is_err());
    }

    #[test]
    fn reference_has_expected_shape() {
        let reference = generate_reference();
        assert!(reference.starts_with("BK-"));
        assert_eq!(reference.len(), 11);
        assert!(reference[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
