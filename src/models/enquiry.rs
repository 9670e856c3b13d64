use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnquiryStatus {
    New,
    Contacted,
    Closed,
}

impl EnquiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnquiryStatus::New => "new",
            EnquiryStatus::Contacted => "contacted",
            EnquiryStatus::Closed => "closed",
        }
    }
}

impl TryFrom<String> for EnquiryStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "new" => Ok(EnquiryStatus::New),
            "contacted" => Ok(EnquiryStatus::Contacted),
            "closed" => Ok(EnquiryStatus::Closed),
            other => Err(format!("unknown enquiry status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Enquiry {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub package_id: Option<i64>,
    pub destination: Option<String>,
    pub travel_date: Option<NaiveDate>,
    pub travellers: Option<i32>,
    pub message: String,
    #[sqlx(try_from = "String")]
    pub status: EnquiryStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEnquiry {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub package_id: Option<i64>,
    pub destination: Option<String>,
    pub travel_date: Option<NaiveDate>,
    pub travellers: Option<i32>,
    pub message: String,
}

impl Enquiry {
    pub async fn insert(pool: &PgPool, new: &NewEnquiry) -> Result<Enquiry, sqlx::Error> {
        sqlx::query_as::<_, Enquiry>(
            "INSERT INTO enquiries (name, email, phone, package_id, destination, travel_date, travellers, message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(new.package_id)
        .bind(&new.destination)
        .bind(new.travel_date)
        .bind(new.travellers)
        .bind(&new.message)
        .fetch_one(pool)
        .await
    }

    pub async fn find(pool: &PgPool, id: i64) -> Result<Option<Enquiry>, sqlx::Error> {
        sqlx::query_as::<_, Enquiry>("SELECT * FROM enquiries WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &PgPool,
        status: Option<EnquiryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Enquiry>, sqlx::Error> {
        sqlx::query_as::<_, Enquiry>(
            "SELECT * FROM enquiries
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn set_status(
        pool: &PgPool,
        id: i64,
        status: EnquiryStatus,
    ) -> Result<Option<Enquiry>, sqlx::Error> {
        sqlx::query_as::<_, Enquiry>("UPDATE enquiries SET status = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(pool)
            .await
    }
}
