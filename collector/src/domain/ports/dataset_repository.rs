//! Driven port for persisted output tables.
//!
//! Tables are grouped into datasets (one per campaign output directory) and
//! addressed by file name. Writes replace the whole table.

use std::fmt;

use async_trait::async_trait;
use table_store::Table;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by dataset persistence adapters.
    pub enum DatasetRepositoryError {
        /// The table could not be read or written.
        Io { message: String } => "dataset I/O failed: {message}",
        /// The stored table was malformed.
        Format { message: String } => "dataset table is malformed: {message}",
    }
}

/// Location of one table: dataset directory plus file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableLocation {
    dataset: String,
    file_name: String,
}

impl TableLocation {
    /// Address `file_name` inside `dataset`.
    pub fn new(dataset: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            file_name: file_name.into(),
        }
    }

    /// Dataset (output directory) name.
    pub fn dataset(&self) -> &str {
        self.dataset.as_str()
    }

    /// Table file name.
    pub fn file_name(&self) -> &str {
        self.file_name.as_str()
    }
}

impl fmt::Display for TableLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.file_name)
    }
}

/// Port for reading back and replacing persisted tables.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    /// Read a table, or `None` when it has never been written.
    async fn read_table(
        &self,
        location: &TableLocation,
    ) -> Result<Option<Table>, DatasetRepositoryError>;

    /// Replace a table with `table`.
    async fn write_table(
        &self,
        location: &TableLocation,
        table: &Table,
    ) -> Result<(), DatasetRepositoryError>;
}
