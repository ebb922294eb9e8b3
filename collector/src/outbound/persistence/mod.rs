//! Filesystem persistence adapters for published tables.
//!
//! Tables are CSV files grouped into dataset directories below one data
//! root. Adapters translate between `table_store` errors and the domain's
//! repository error type; they hold no business logic.
//!
//! # Example
//!
//! ```ignore
//! use collector::outbound::persistence::CsvDatasetRepository;
//!
//! let repo = CsvDatasetRepository::new("data");
//! ```

mod csv_dataset_repository;

pub use csv_dataset_repository::CsvDatasetRepository;
