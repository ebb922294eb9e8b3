//! Rectangular CSV tables with atomic whole-file replacement.
//!
//! Collector outputs are flat files with a header row whose column order must
//! stay stable across runs. This crate owns that contract:
//!
//! - [`Table`] keeps a header and rows of equal width
//! - [`encode_csv`] and [`decode_csv`] translate tables to and from CSV text
//! - [`TableDir`] reads tables from, and atomically writes tables into, one
//!   output directory so a crashed run never leaves a half-written file
//!
//! # Example
//!
//! ```
//! use table_store::{Table, decode_csv, encode_csv};
//!
//! let mut table = Table::new(["date", "observations"]);
//! table.push_row(["2025-05-03", "12"]).expect("row width matches header");
//!
//! let text = encode_csv(&table).expect("encode");
//! assert_eq!(text, "date,observations\n2025-05-03,12\n");
//! assert_eq!(decode_csv(&text).expect("decode"), table);
//! ```

mod atomic_io;
mod codec;
mod dir;
mod error;
mod table;

pub use codec::{decode_csv, encode_csv};
pub use dir::TableDir;
pub use error::TableError;
pub use table::Table;
