//! Filesystem response cache addressed by a digest of the cache key.

use async_trait::async_trait;
use camino::Utf8Path;
use sha2::{Digest, Sha256};
use table_store::{TableDir, TableError};
use tracing::debug;

use crate::domain::ports::{CacheKey, CachedResponse, ResponseCache, ResponseCacheError};

/// Response cache writing `<sha256(key)>.json` files into one directory.
///
/// Each entry carries its own storage and expiry timestamps; freshness is
/// judged by the caller against its clock.
#[derive(Debug)]
pub struct FileResponseCache {
    dir: TableDir,
}

impl FileResponseCache {
    /// Open (creating if needed) the cache directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the directory cannot be opened.
    pub fn open(root: impl AsRef<Utf8Path>) -> Result<Self, ResponseCacheError> {
        let dir = TableDir::open(root).map_err(map_backend_error)?;
        Ok(Self { dir })
    }

    /// Directory holding the cache entries.
    pub fn root(&self) -> &Utf8Path {
        self.dir.root()
    }

    fn file_name(key: &CacheKey) -> String {
        let digest = Sha256::digest(key.as_str().as_bytes());
        format!("{}.json", hex::encode(digest))
    }
}

fn map_backend_error(error: TableError) -> ResponseCacheError {
    ResponseCacheError::backend(error.to_string())
}

#[async_trait]
impl ResponseCache for FileResponseCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, ResponseCacheError> {
        let Some(text) = self
            .dir
            .read_text(&Self::file_name(key))
            .map_err(map_backend_error)?
        else {
            return Ok(None);
        };
        let entry = serde_json::from_str(&text)
            .map_err(|error| ResponseCacheError::serialization(error.to_string()))?;
        Ok(Some(entry))
    }

    async fn put(&self, key: &CacheKey, entry: &CachedResponse) -> Result<(), ResponseCacheError> {
        let text = serde_json::to_string(entry)
            .map_err(|error| ResponseCacheError::serialization(error.to_string()))?;
        let file_name = Self::file_name(key);
        self.dir
            .write_text(&file_name, &text)
            .map_err(map_backend_error)?;
        debug!(key = %key, file = %file_name, "cached API response");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Filesystem round trips through a temporary directory.

    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::test_support::workspace::DataWorkspace;

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw).expect("valid key")
    }

    #[rstest]
    #[tokio::test]
    async fn stored_entries_are_read_back() {
        let workspace = DataWorkspace::new();
        let cache = FileResponseCache::open(workspace.path("cache")).expect("cache opens");
        let stored_at = Utc
            .with_ymd_and_hms(2025, 5, 10, 9, 0, 0)
            .single()
            .expect("valid time");
        let entry = CachedResponse::new(
            json!({ "total_results": 12, "results": [] }),
            stored_at,
            Duration::from_secs(1800),
        );

        cache
            .put(&key("observations?project_id=417"), &entry)
            .await
            .expect("put");

        let read = cache
            .get(&key("observations?project_id=417"))
            .await
            .expect("get");
        assert_eq!(read, Some(entry));
        assert!(
            cache
                .get(&key("observations?project_id=418"))
                .await
                .expect("get")
                .is_none()
        );
    }

    #[rstest]
    fn file_names_are_content_addressed() {
        let name = FileResponseCache::file_name(&key("observations?project_id=417"));
        assert_eq!(name.len(), 64 + ".json".len());
        assert_eq!(
            name,
            FileResponseCache::file_name(&key("observations?project_id=417"))
        );
        assert_ne!(
            name,
            FileResponseCache::file_name(&key("observations?project_id=418"))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn corrupt_entries_surface_as_serialization_errors() {
        let workspace = DataWorkspace::new();
        let cache = FileResponseCache::open(workspace.path("cache")).expect("cache opens");
        let key = key("observations?project_id=417");
        TableDir::open(cache.root())
            .expect("dir")
            .write_text(&FileResponseCache::file_name(&key), "{not json")
            .expect("write");

        let error = cache.get(&key).await.expect_err("must fail");
        assert!(matches!(error, ResponseCacheError::Serialization { .. }));
    }
}
