use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use validator::Validate;

use super::validate_slug;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub category: String,
    pub destination_id: Option<i64>,
    pub content_html: String,
    pub price: f64,
    pub sale_price: Option<f64>,
    pub currency: String,
    pub duration_days: Option<i32>,
    pub inclusions: Option<String>,
    pub exclusions: Option<String>,
    pub hero_image: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Облегчённая карточка пакета для списков.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PackageSummary {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub category: String,
    pub destination_id: Option<i64>,
    pub price: f64,
    pub sale_price: Option<f64>,
    pub currency: String,
    pub duration_days: Option<i32>,
    pub hero_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PackageInput {
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    #[validate(custom(function = "validate_slug"))]
    pub slug: String,
    #[validate(length(min = 1, message = "is required"))]
    pub category: String,
    pub destination_id: Option<i64>,
    #[serde(default)]
    pub content_html: String,
    #[validate(range(exclusive_min = 0.0, message = "must be greater than 0"))]
    pub price: f64,
    #[validate(range(min = 0.0, message = "must not be negative"))]
    pub sale_price: Option<f64>,
    #[validate(length(equal = 3, message = "must be a 3-letter code"))]
    pub currency: String,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub duration_days: Option<i32>,
    pub inclusions: Option<String>,
    pub exclusions: Option<String>,
    pub hero_image: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Фильтр каталога. Все поля опциональны и объединяются через AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageFilter {
    pub category: Option<String>,
    pub destination_id: Option<i64>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub search: Option<String>,
}

const PACKAGE_COLUMNS: &str = "p.id, p.name, p.slug, p.category, p.destination_id, p.content_html, \
     p.price::float8 AS price, p.sale_price::float8 AS sale_price, p.currency, p.duration_days, \
     p.inclusions, p.exclusions, p.hero_image, p.is_active, p.created_at, p.updated_at";

const SUMMARY_COLUMNS: &str = "p.id, p.name, p.slug, p.category, p.destination_id, \
     p.price::float8 AS price, p.sale_price::float8 AS sale_price, p.currency, p.duration_days, \
     p.hero_image";

impl Package {
    /// The price a customer pays: the sale price when one is set and lower.
    pub fn effective_price(&self) -> f64 {
        match self.sale_price {
            Some(sale) if sale > 0.0 && sale < self.price => sale,
            _ => self.price,
        }
    }

    pub async fn find(pool: &PgPool, id: i64) -> Result<Option<Package>, sqlx::Error> {
        let sql = format!("SELECT {} FROM packages p WHERE p.id = $1", PACKAGE_COLUMNS);
        sqlx::query_as::<_, Package>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Package>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM packages p WHERE p.slug = $1 AND p.is_active",
            PACKAGE_COLUMNS
        );
        sqlx::query_as::<_, Package>(&sql)
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    pub async fn search(
        pool: &PgPool,
        filter: &PackageFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PackageSummary>, sqlx::Error> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM packages p LEFT JOIN destinations d ON d.id = p.destination_id \
             WHERE p.is_active",
            SUMMARY_COLUMNS
        ));

        if let Some(category) = &filter.category {
            qb.push(" AND p.category = ").push_bind(category.clone());
        }
        if let Some(destination_id) = filter.destination_id {
            qb.push(" AND p.destination_id = ").push_bind(destination_id);
        }
        if let Some(country) = &filter.country {
            qb.push(" AND lower(d.country) = lower(").push_bind(country.clone()).push(")");
        }
        if let Some(region) = &filter.region {
            qb.push(" AND d.region = ").push_bind(region.clone());
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            qb.push(" AND p.name ILIKE ")
                .push_bind(format!("%{}%", search.trim()));
        }

        qb.push(" ORDER BY p.name LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        qb.build_query_as::<PackageSummary>().fetch_all(pool).await
    }

    pub async fn create(pool: &PgPool, input: &PackageInput) -> Result<Package, sqlx::Error> {
        let sql = format!(
            "WITH p AS ( \
               INSERT INTO packages (name, slug, category, destination_id, content_html, price, \
               sale_price, currency, duration_days, inclusions, exclusions, hero_image, is_active) \
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING * \
             ) SELECT {} FROM p",
            PACKAGE_COLUMNS
        );
        bind_input(sqlx::query_as::<_, Package>(&sql), input)
            .fetch_one(pool)
            .await
    }

    pub async fn update(
        pool: &PgPool,
        id: i64,
        input: &PackageInput,
    ) -> Result<Option<Package>, sqlx::Error> {
        let sql = format!(
            "WITH p AS ( \
               UPDATE packages SET name = $1, slug = $2, category = $3, destination_id = $4, \
               content_html = $5, price = $6, sale_price = $7, currency = $8, duration_days = $9, \
               inclusions = $10, exclusions = $11, hero_image = $12, is_active = $13, \
               updated_at = NOW() WHERE id = $14 RETURNING * \
             ) SELECT {} FROM p",
            PACKAGE_COLUMNS
        );
        bind_input(sqlx::query_as::<_, Package>(&sql), input)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        // Пакеты с бронями не удаляем физически, а снимаем с публикации.
        let has_bookings = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM bookings WHERE package_id = $1)",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        let result = if has_bookings {
            sqlx::query("UPDATE packages SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await?
        } else {
            sqlx::query("DELETE FROM packages WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await?
        };

        Ok(result.rows_affected() > 0)
    }
}

fn bind_input<'q>(
    query: sqlx::query::QueryAs<'q, Postgres, Package, sqlx::postgres::PgArguments>,
    input: &'q PackageInput,
) -> sqlx::query::QueryAs<'q, Postgres, Package, sqlx::postgres::PgArguments> {
    query
        .bind(&input.name)
        .bind(&input.slug)
        .bind(&input.category)
        .bind(input.destination_id)
        .bind(&input.content_html)
        .bind(input.price)
        .bind(input.sale_price)
        .bind(&input.currency)
        .bind(input.duration_days)
        .bind(&input.inclusions)
        .bind(&input.exclusions)
        .bind(&input.hero_image)
        .bind(input.is_active)
}
