//! Error types for the table-store crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while shaping, encoding, or persisting tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// A row did not have one cell per header column.
    #[error("row {row} has {actual} cells but the header has {expected} columns")]
    RowWidth {
        /// Zero-based index of the offending row.
        row: usize,
        /// Number of header columns.
        expected: usize,
        /// Number of cells in the row.
        actual: usize,
    },

    /// CSV text could not be produced or parsed.
    #[error("invalid CSV: {message}")]
    Csv {
        /// Description of the CSV failure.
        message: String,
    },

    /// A table file could not be read.
    #[error("failed to read table at '{path}': {message}")]
    Read {
        /// Path of the table file.
        path: PathBuf,
        /// Description of the I/O error.
        message: String,
    },

    /// A table file could not be written.
    #[error("failed to write table at '{path}': {message}")]
    Write {
        /// Path of the table file.
        path: PathBuf,
        /// Description of the I/O error.
        message: String,
    },
}

impl From<csv::Error> for TableError {
    fn from(value: csv::Error) -> Self {
        Self::Csv {
            message: value.to_string(),
        }
    }
}
