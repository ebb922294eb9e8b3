//! Temporary data directories for filesystem adapter tests.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

/// A temporary directory removed on drop, addressed with UTF-8 paths.
pub struct DataWorkspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl DataWorkspace {
    pub fn new() -> Self {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("temp dir: {error}"),
        };
        let root = match Utf8PathBuf::from_path_buf(dir.path().to_path_buf()) {
            Ok(root) => root,
            Err(path) => panic!("temp dir is not UTF-8: {}", path.display()),
        };
        Self { _dir: dir, root }
    }

    /// Workspace root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// `relative` resolved inside the workspace.
    pub fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }
}

impl Default for DataWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
