//! Response cache adapters.
//!
//! [`FileResponseCache`] stores one JSON document per cache key under a
//! directory. [`DisabledResponseCache`] always misses and discards writes; it
//! is used when no cache directory is configured.

mod file;

use async_trait::async_trait;

use crate::domain::ports::{CacheKey, CachedResponse, ResponseCache, ResponseCacheError};

pub use file::FileResponseCache;

/// Cache that always misses.
#[derive(Debug, Clone, Default)]
pub struct DisabledResponseCache;

impl DisabledResponseCache {
    /// Create a disabled cache.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseCache for DisabledResponseCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<CachedResponse>, ResponseCacheError> {
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _entry: &CachedResponse) -> Result<(), ResponseCacheError> {
        Ok(())
    }
}
