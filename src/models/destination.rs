use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use validator::Validate;

use super::validate_slug;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Destination {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub region: String,
    pub country: Option<String>,
    pub description: Option<String>,
    pub hero_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DestinationInput {
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    #[validate(custom(function = "validate_slug"))]
    pub slug: String,
    #[validate(custom(function = "validate_slug"))]
    pub region: String,
    pub country: Option<String>,
    pub description: Option<String>,
    pub hero_image: Option<String>,
}

impl Destination {
    pub async fn list(pool: &PgPool, region: Option<&str>) -> Result<Vec<Destination>, sqlx::Error> {
        sqlx::query_as::<_, Destination>(
            "SELECT * FROM destinations WHERE ($1::text IS NULL OR region = $1) ORDER BY region, name",
        )
        .bind(region)
        .fetch_all(pool)
        .await
    }

    pub async fn find(pool: &PgPool, id: i64) -> Result<Option<Destination>, sqlx::Error> {
        sqlx::query_as::<_, Destination>("SELECT * FROM destinations WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Destination>, sqlx::Error> {
        sqlx::query_as::<_, Destination>("SELECT * FROM destinations WHERE slug = $1")
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(pool: &PgPool, input: &DestinationInput) -> Result<Destination, sqlx::Error> {
        sqlx::query_as::<_, Destination>(
            "INSERT INTO destinations (name, slug, region, country, description, hero_image)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(&input.name)
        .bind(&input.slug)
        .bind(&input.region)
        .bind(&input.country)
        .bind(&input.description)
        .bind(&input.hero_image)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: i64,
        input: &DestinationInput,
    ) -> Result<Option<Destination>, sqlx::Error> {
        sqlx::query_as::<_, Destination>(
            "UPDATE destinations
             SET name = $1, slug = $2, region = $3, country = $4, description = $5, hero_image = $6
             WHERE id = $7
             RETURNING *",
        )
        .bind(&input.name)
        .bind(&input.slug)
        .bind(&input.region)
        .bind(&input.country)
        .bind(&input.description)
        .bind(&input.hero_image)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM destinations WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
