use crate::redis_client::RedisClient;

pub mod catalog;
pub mod webhooks;

/// Redis-кеш каталога и служебные ключи (защита от повторных вебхуков).
/// Любая ошибка Redis деградирует до обращения в БД, а не до ошибки запроса.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
}

impl CacheService {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}
