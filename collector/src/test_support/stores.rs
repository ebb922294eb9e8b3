//! In-memory adapters for the cache, dataset and taxonomy ports.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use table_store::Table;

use crate::domain::ports::{
    CacheKey, CachedResponse, DatasetRepository, DatasetRepositoryError, MarineFlags,
    ResponseCache, ResponseCacheError, TableLocation, TaxonomyReference, TaxonomyReferenceError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("in-memory store mutex"),
    }
}

/// Response cache held in a map.
#[derive(Default)]
pub struct InMemoryResponseCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl InMemoryResponseCache {
    /// Stored entry for `key`, regardless of freshness.
    pub fn entry(&self, key: &CacheKey) -> Option<CachedResponse> {
        lock(&self.entries).get(key.as_str()).cloned()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, ResponseCacheError> {
        Ok(self.entry(key))
    }

    async fn put(&self, key: &CacheKey, entry: &CachedResponse) -> Result<(), ResponseCacheError> {
        lock(&self.entries).insert(key.as_str().to_owned(), entry.clone());
        Ok(())
    }
}

/// Dataset repository held in a map, counting writes.
#[derive(Default)]
pub struct InMemoryDatasetRepository {
    tables: Mutex<BTreeMap<TableLocation, Table>>,
    writes: Mutex<Vec<TableLocation>>,
}

impl InMemoryDatasetRepository {
    /// Seed a stored table.
    pub fn insert(&self, location: TableLocation, table: Table) {
        lock(&self.tables).insert(location, table);
    }

    /// Stored table at `location`.
    pub fn table(&self, location: &TableLocation) -> Option<Table> {
        lock(&self.tables).get(location).cloned()
    }

    /// Locations written so far, in write order.
    pub fn writes(&self) -> Vec<TableLocation> {
        lock(&self.writes).clone()
    }
}

#[async_trait]
impl DatasetRepository for InMemoryDatasetRepository {
    async fn read_table(
        &self,
        location: &TableLocation,
    ) -> Result<Option<Table>, DatasetRepositoryError> {
        Ok(self.table(location))
    }

    async fn write_table(
        &self,
        location: &TableLocation,
        table: &Table,
    ) -> Result<(), DatasetRepositoryError> {
        lock(&self.writes).push(location.clone());
        self.insert(location.clone(), table.clone());
        Ok(())
    }
}

/// Taxonomy reference serving fixed flags.
#[derive(Debug, Clone, Default)]
pub struct StaticTaxonomyReference {
    flags: MarineFlags,
}

impl StaticTaxonomyReference {
    pub fn new(flags: impl IntoIterator<Item = (u64, bool)>) -> Self {
        Self {
            flags: flags.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TaxonomyReference for StaticTaxonomyReference {
    async fn marine_flags(&self) -> Result<MarineFlags, TaxonomyReferenceError> {
        Ok(self.flags.clone())
    }
}
