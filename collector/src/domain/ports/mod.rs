//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod cache_key;
mod dataset_repository;
mod observation_api;
mod response_cache;
mod taxonomy_reference;

pub use cache_key::{CacheKey, CacheKeyValidationError};
#[cfg(test)]
pub use dataset_repository::MockDatasetRepository;
pub use dataset_repository::{DatasetRepository, DatasetRepositoryError, TableLocation};
#[cfg(test)]
pub use observation_api::MockObservationApi;
pub use observation_api::{ApiQuery, Endpoint, ObservationApi, ObservationApiError};
#[cfg(test)]
pub use response_cache::MockResponseCache;
pub use response_cache::{CachedResponse, ResponseCache, ResponseCacheError};
#[cfg(test)]
pub use taxonomy_reference::MockTaxonomyReference;
pub use taxonomy_reference::{MarineFlags, TaxonomyReference, TaxonomyReferenceError};
