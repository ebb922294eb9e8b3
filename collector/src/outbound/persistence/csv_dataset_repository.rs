//! CSV-backed dataset repository.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use table_store::{Table, TableDir, TableError};
use tracing::debug;

use crate::domain::ports::{DatasetRepository, DatasetRepositoryError, TableLocation};

/// Repository storing each dataset as a directory of CSV files under `root`.
///
/// Dataset directories are created on first use. An empty dataset name
/// addresses the root itself.
#[derive(Debug)]
pub struct CsvDatasetRepository {
    root: Utf8PathBuf,
    dirs: Mutex<HashMap<String, Arc<TableDir>>>,
}

impl CsvDatasetRepository {
    /// Build a repository rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: Mutex::new(HashMap::new()),
        }
    }

    /// Data root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn dataset_dir(&self, dataset: &str) -> Result<Arc<TableDir>, DatasetRepositoryError> {
        let relative = Utf8Path::new(dataset);
        if relative
            .components()
            .any(|component| !matches!(component, Utf8Component::Normal(_)))
        {
            return Err(DatasetRepositoryError::io(format!(
                "dataset '{dataset}' must be a relative path without '..'"
            )));
        }

        let mut dirs = self
            .dirs
            .lock()
            .map_err(|_| DatasetRepositoryError::io("dataset directory cache poisoned"))?;
        if let Some(dir) = dirs.get(dataset) {
            return Ok(dir.clone());
        }
        let dir = Arc::new(TableDir::open(self.root.join(relative)).map_err(map_table_error)?);
        debug!(dataset, path = %dir.root(), "opened dataset directory");
        dirs.insert(dataset.to_owned(), dir.clone());
        Ok(dir)
    }
}

fn map_table_error(error: TableError) -> DatasetRepositoryError {
    match error {
        TableError::Read { .. } | TableError::Write { .. } => {
            DatasetRepositoryError::io(error.to_string())
        }
        TableError::Csv { .. } | TableError::RowWidth { .. } => {
            DatasetRepositoryError::format(error.to_string())
        }
    }
}

#[async_trait]
impl DatasetRepository for CsvDatasetRepository {
    async fn read_table(
        &self,
        location: &TableLocation,
    ) -> Result<Option<Table>, DatasetRepositoryError> {
        self.dataset_dir(location.dataset())?
            .read(location.file_name())
            .map_err(map_table_error)
    }

    async fn write_table(
        &self,
        location: &TableLocation,
        table: &Table,
    ) -> Result<(), DatasetRepositoryError> {
        self.dataset_dir(location.dataset())?
            .write(location.file_name(), table)
            .map_err(map_table_error)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::workspace::DataWorkspace;

    fn sample() -> Table {
        let mut table = Table::new(["metric", "value"]);
        table.push_row(["observations", "120"]).expect("row");
        table
    }

    #[rstest]
    #[tokio::test]
    async fn tables_round_trip_through_dataset_directories() {
        let workspace = DataWorkspace::new();
        let repo = CsvDatasetRepository::new(workspace.root());
        let location = TableLocation::new("biomarato", "417_metrics_realtime.csv");

        assert!(repo.read_table(&location).await.expect("read").is_none());
        repo.write_table(&location, &sample()).await.expect("write");

        assert_eq!(repo.read_table(&location).await.expect("read"), Some(sample()));
        let text = TableDir::open(workspace.path("biomarato"))
            .expect("dir")
            .read_text("417_metrics_realtime.csv")
            .expect("read text");
        assert_eq!(text.as_deref(), Some("metric,value\nobservations,120\n"));
    }

    #[rstest]
    #[tokio::test]
    async fn empty_dataset_addresses_the_root() {
        let workspace = DataWorkspace::new();
        let repo = CsvDatasetRepository::new(workspace.root());
        let location = TableLocation::new("", "counter.csv");

        repo.write_table(&location, &sample()).await.expect("write");
        assert!(workspace.path("counter.csv").exists());
    }

    #[rstest]
    #[case("../outside")]
    #[case("/absolute")]
    #[tokio::test]
    async fn escaping_datasets_are_rejected(#[case] dataset: &str) {
        let workspace = DataWorkspace::new();
        let repo = CsvDatasetRepository::new(workspace.root());
        let error = repo
            .write_table(&TableLocation::new(dataset, "x.csv"), &sample())
            .await
            .expect_err("must be rejected");
        assert!(matches!(error, DatasetRepositoryError::Io { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_tables_are_format_errors() {
        let workspace = DataWorkspace::new();
        TableDir::open(workspace.root())
            .expect("dir")
            .write_text("broken.csv", "a,b\n1\n")
            .expect("seed");
        let repo = CsvDatasetRepository::new(workspace.root());

        let error = repo
            .read_table(&TableLocation::new("", "broken.csv"))
            .await
            .expect_err("must fail");
        assert!(matches!(error, DatasetRepositoryError::Format { .. }));
    }
}
