//! Runs the collector boundary check.
//!
//! With no argument the collector is found next to the nearest workspace
//! manifest above the working directory. A collector directory may be given
//! as the only argument instead.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    let outcome = collector_dir().and_then(|dir| {
        architecture_lint::lint_collector_sources(&dir).map_err(|err| err.to_string())
    });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            writeln!(io::stderr().lock(), "architecture-lint: {message}").ok();
            ExitCode::FAILURE
        }
    }
}

fn collector_dir() -> Result<PathBuf, String> {
    if let Some(explicit) = env::args_os().nth(1) {
        return Ok(PathBuf::from(explicit));
    }
    let starts = [
        env::var_os("CARGO_WORKSPACE_DIR").map(PathBuf::from),
        env::current_dir().ok(),
        Some(PathBuf::from(env!("CARGO_MANIFEST_DIR"))),
    ];
    starts
        .iter()
        .flatten()
        .find_map(|start| workspace_root(start))
        .map(|root| root.join("collector"))
        .ok_or_else(|| {
            "no workspace manifest found; pass the collector directory explicitly".to_owned()
        })
}

fn workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            fs::read_to_string(dir.join("Cargo.toml"))
                .is_ok_and(|manifest| manifest.contains("[workspace]"))
        })
        .map(Path::to_path_buf)
}
