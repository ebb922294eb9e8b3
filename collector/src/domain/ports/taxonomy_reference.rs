//! Driven port for the static marine/terrestrial taxonomy table.

use std::collections::HashMap;

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced while loading the taxonomy reference.
    pub enum TaxonomyReferenceError {
        /// The reference table could not be downloaded or read.
        Fetch { message: String } => "taxonomy reference fetch failed: {message}",
        /// The reference table was not in the expected shape.
        Parse { message: String } => "taxonomy reference parse failed: {message}",
    }
}

/// Marine flag per taxon identifier.
///
/// Taxa absent from the reference have no classification; lookups return
/// `None` rather than defaulting to terrestrial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarineFlags(HashMap<u64, bool>);

impl MarineFlags {
    /// Number of classified taxa.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no taxa are classified.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Classification of `taxon_id`, if the reference knows it.
    pub fn get(&self, taxon_id: u64) -> Option<bool> {
        self.0.get(&taxon_id).copied()
    }
}

impl FromIterator<(u64, bool)> for MarineFlags {
    fn from_iter<T: IntoIterator<Item = (u64, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Port for loading the taxonomy reference.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaxonomyReference: Send + Sync {
    /// Load marine flags for every taxon the reference classifies.
    async fn marine_flags(&self) -> Result<MarineFlags, TaxonomyReferenceError>;
}
