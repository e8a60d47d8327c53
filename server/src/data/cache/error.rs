//! Cache error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache configuration error: {0}")]
    Config(String),

    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for CacheError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}
