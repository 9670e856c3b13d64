use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use tracing::{debug, info, warn};

use crate::cache::CacheService;

const VERSION_KEY: &str = "catalog:version";
const LISTING_TTL_SECONDS: u64 = 600;

impl CacheService {
    /// Текущее поколение кеша каталога. Инвалидация - это INCR, старые ключи
    /// просто перестают читаться и умирают по TTL.
    async fn catalog_version(&self) -> Result<i64, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let version: Option<i64> = conn.get(VERSION_KEY).await?;
        Ok(version.unwrap_or(0))
    }

    /// Читает листинг из кеша, при промахе вызывает `load` и кладёт результат в Redis.
    pub async fn cached_listing<T, F, Fut, E>(&self, key: &str, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let version = match self.catalog_version().await {
            Ok(v) => v,
            Err(e) => {
                warn!("Catalog cache unavailable, reading from database: {:?}", e);
                return load().await;
            }
        };
        let full_key = format!("catalog:v{}:{}", version, key);
        let mut conn = self.redis.conn.clone();

        let cached: Result<Option<String>, _> = conn.get(&full_key).await;
        if let Ok(Some(data)) = cached {
            if let Ok(value) = serde_json::from_str::<T>(&data) {
                debug!("Catalog cache HIT {}", full_key);
                return Ok(value);
            }
        }

        let value = load().await?;
        if let Ok(data) = serde_json::to_string(&value) {
            let stored: Result<(), _> = conn.set_ex(&full_key, data, LISTING_TTL_SECONDS).await;
            if let Err(e) = stored {
                warn!("Failed to cache {}: {:?}", full_key, e);
            }
        }
        Ok(value)
    }

    // Инвалидировать весь кеш каталога
    pub async fn invalidate_catalog(&self) {
        let mut conn = self.redis.conn.clone();
        let result: Result<i64, _> = conn.incr(VERSION_KEY, 1).await;
        match result {
            Ok(version) => info!("Catalog cache invalidated, now at version {}", version),
            Err(e) => warn!("Failed to invalidate catalog cache: {:?}", e),
        }
    }
}
