//! Capability-scoped table directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;

use crate::atomic_io::{file_name_of, write_atomic};
use crate::codec::{decode_csv, encode_csv};
use crate::error::TableError;
use crate::table::Table;

/// One output directory holding CSV tables addressed by file name.
#[derive(Debug)]
pub struct TableDir {
    root: Utf8PathBuf,
    dir: Dir,
}

impl TableDir {
    /// Open `root`, creating it (and its parents) when missing.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Write`] when the directory cannot be created or
    /// opened.
    pub fn open(root: impl AsRef<Utf8Path>) -> Result<Self, TableError> {
        let path = root.as_ref();
        let opened = Dir::create_ambient_dir_all(path, ambient_authority())
            .and_then(|()| Dir::open_ambient_dir(path, ambient_authority()));
        match opened {
            Ok(dir) => Ok(Self {
                root: path.to_path_buf(),
                dir,
            }),
            Err(err) => Err(TableError::Write {
                path: path.as_std_path().to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    /// Directory path this handle was opened with.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Read the table stored under `name`, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Read`] for I/O failures other than a missing file
    /// and CSV errors for malformed content.
    pub fn read(&self, name: &str) -> Result<Option<Table>, TableError> {
        let path = Utf8Path::new(name);
        file_name_of(path)?;
        match self.dir.read_to_string(name) {
            Ok(text) => decode_csv(&text).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TableError::Read {
                path: self.root.join(name).into_std_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    /// Atomically replace the table stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Write`] when the file cannot be written and
    /// [`TableError::Csv`] when encoding fails.
    pub fn write(&self, name: &str, table: &Table) -> Result<(), TableError> {
        let contents = encode_csv(table)?;
        write_atomic(&self.dir, Utf8Path::new(name), &contents)
    }

    /// Write raw bytes-as-text under `name` atomically.
    ///
    /// Used for mirrored reference files that are not produced from a
    /// [`Table`].
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Write`] when the file cannot be written.
    pub fn write_text(&self, name: &str, contents: &str) -> Result<(), TableError> {
        write_atomic(&self.dir, Utf8Path::new(name), contents)
    }

    /// Read a file's text, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Read`] for I/O failures other than a missing file.
    pub fn read_text(&self, name: &str) -> Result<Option<String>, TableError> {
        file_name_of(Utf8Path::new(name))?;
        match self.dir.read_to_string(name) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TableError::Read {
                path: self.root.join(name).into_std_path_buf(),
                message: err.to_string(),
            }),
        }
    }
}
