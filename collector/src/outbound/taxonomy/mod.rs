//! Marine/terrestrial reference backed by the published taxon tree CSV.
//!
//! The CSV is downloaded once, mirrored under the data directory and reused
//! on later runs. Within a run the parsed flags are memoised.

use std::time::Duration;

use async_trait::async_trait;
use camino::Utf8Path;
use reqwest::{Client, Url};
use table_store::{Table, TableDir, decode_csv};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::domain::parse_taxon_key;
use crate::domain::ports::{MarineFlags, TaxonomyReference, TaxonomyReferenceError};

/// File name of the local mirror.
pub const TAXON_TREE_FILE: &str = "taxon_tree_with_marines.csv";

/// Taxonomy reference reading `taxon_id` and `marine` from the taxon tree.
pub struct TaxonTreeReference {
    client: Client,
    source: Url,
    mirror: TableDir,
    flags: OnceCell<MarineFlags>,
}

impl TaxonTreeReference {
    /// Build a reference downloading from `source` and mirroring into `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns a fetch error when the HTTP client cannot be built and a parse
    /// error when the mirror directory cannot be opened.
    pub fn new(
        source: Url,
        data_dir: impl AsRef<Utf8Path>,
        timeout: Duration,
    ) -> Result<Self, TaxonomyReferenceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TaxonomyReferenceError::fetch(error.to_string()))?;
        let mirror = TableDir::open(data_dir)
            .map_err(|error| TaxonomyReferenceError::fetch(error.to_string()))?;
        Ok(Self {
            client,
            source,
            mirror,
            flags: OnceCell::new(),
        })
    }

    async fn load(&self) -> Result<MarineFlags, TaxonomyReferenceError> {
        match self.mirror.read_text(TAXON_TREE_FILE) {
            Ok(Some(text)) => {
                info!(file = TAXON_TREE_FILE, "using mirrored taxon tree");
                return parse_marine_flags(&text);
            }
            Ok(None) => {}
            Err(error) => warn!(error = %error, "taxon tree mirror unreadable, downloading"),
        }

        let text = self.download().await?;
        let flags = parse_marine_flags(&text)?;
        if let Err(error) = self.mirror.write_text(TAXON_TREE_FILE, &text) {
            warn!(error = %error, "failed to mirror taxon tree");
        }
        info!(taxa = flags.len(), "downloaded taxon tree");
        Ok(flags)
    }

    async fn download(&self) -> Result<String, TaxonomyReferenceError> {
        let response = self
            .client
            .get(self.source.clone())
            .send()
            .await
            .map_err(|error| TaxonomyReferenceError::fetch(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TaxonomyReferenceError::fetch(format!(
                "status {}",
                status.as_u16()
            )));
        }
        response
            .text()
            .await
            .map_err(|error| TaxonomyReferenceError::fetch(error.to_string()))
    }
}

#[async_trait]
impl TaxonomyReference for TaxonTreeReference {
    async fn marine_flags(&self) -> Result<MarineFlags, TaxonomyReferenceError> {
        self.flags
            .get_or_try_init(|| self.load())
            .await
            .cloned()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" => Some(true),
        "false" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

/// Parse the taxon tree CSV into marine flags.
///
/// Rows with an unusable taxon key or flag are skipped.
///
/// # Errors
///
/// Returns a parse error when the CSV is malformed or lacks the `taxon_id`
/// or `marine` column.
pub fn parse_marine_flags(text: &str) -> Result<MarineFlags, TaxonomyReferenceError> {
    let table: Table =
        decode_csv(text).map_err(|error| TaxonomyReferenceError::parse(error.to_string()))?;
    let (Some(id_column), Some(flag_column)) =
        (table.column_index("taxon_id"), table.column_index("marine"))
    else {
        return Err(TaxonomyReferenceError::parse(
            "taxon tree lacks `taxon_id` or `marine` column",
        ));
    };
    Ok(table
        .rows()
        .iter()
        .filter_map(|row| {
            let taxon_id = parse_taxon_key(row.get(id_column)?)?;
            let marine = parse_flag(row.get(flag_column)?)?;
            Some((taxon_id, marine))
        })
        .collect())
}
