//! Atomic file replacement.
//!
//! Tables are written to a hidden temporary file in the target directory and
//! renamed over the destination, so readers only ever observe a complete file.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Component, Utf8Path};
use cap_std::fs::{Dir, OpenOptions};

use crate::error::TableError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Return the single file-name component of `path`.
///
/// Table names are plain file names relative to the output directory.
pub(crate) fn file_name_of(path: &Utf8Path) -> Result<&str, TableError> {
    let mut components = path.components();
    let (Some(Utf8Component::Normal(file_name)), None) = (components.next(), components.next())
    else {
        return Err(TableError::Write {
            path: path.as_std_path().to_path_buf(),
            message: "table name must be a plain file name".to_owned(),
        });
    };
    Ok(file_name)
}

/// Write `contents` to `path` inside `dir` via temp file and rename.
pub(crate) fn write_atomic(dir: &Dir, path: &Utf8Path, contents: &str) -> Result<(), TableError> {
    let file_name = file_name_of(path)?;
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos());
    let tmp_name = format!(
        ".{}.tmp.{}.{}.{}",
        file_name,
        std::process::id(),
        suffix,
        counter
    );

    write_to_temp_file(dir, &tmp_name, path, contents)?;
    rename_temp_to_target(dir, &tmp_name, file_name, path)?;
    sync_parent_directory(dir);

    Ok(())
}

fn write_error(path: &Utf8Path, err: &io::Error) -> TableError {
    TableError::Write {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    }
}

fn write_to_temp_file(
    dir: &Dir,
    tmp_name: &str,
    target_path: &Utf8Path,
    contents: &str,
) -> Result<(), TableError> {
    let tmp_path = target_path.with_file_name(tmp_name);
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    let mut file = dir
        .open_with(tmp_name, &options)
        .map_err(|err| write_error(&tmp_path, &err))?;

    let written = file
        .write_all(contents.as_bytes())
        .and_then(|()| file.sync_all());
    if let Err(err) = written {
        drop(file);
        drop(dir.remove_file(tmp_name));
        return Err(write_error(&tmp_path, &err));
    }

    Ok(())
}

fn rename_temp_to_target(
    dir: &Dir,
    tmp_name: &str,
    target_name: &str,
    target_path: &Utf8Path,
) -> Result<(), TableError> {
    if let Err(err) = rename_temp_to_target_impl(dir, tmp_name, target_name) {
        if dir.remove_file(tmp_name).is_err() {
            // Leftover temp files are hidden and harmless.
        }
        return Err(write_error(target_path, &err));
    }
    Ok(())
}

#[cfg(windows)]
fn rename_temp_to_target_impl(dir: &Dir, tmp_name: &str, target_name: &str) -> io::Result<()> {
    // Windows rename fails if the target exists.
    match dir.remove_file(target_name) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    dir.rename(tmp_name, dir, target_name)
}

#[cfg(not(windows))]
fn rename_temp_to_target_impl(dir: &Dir, tmp_name: &str, target_name: &str) -> io::Result<()> {
    dir.rename(tmp_name, dir, target_name)
}

fn sync_parent_directory(parent: &Dir) {
    if parent.open(".").and_then(|dir| dir.sync_all()).is_err() {
        // Directory sync is best effort.
    }
}
