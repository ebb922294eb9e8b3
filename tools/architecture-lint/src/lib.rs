//! Boundary check for the collector crate.
//!
//! Aggregation code under `collector/src/domain` reaches the outside world
//! only through the traits in `domain::ports`. The Minka HTTP source, the
//! response cache, CSV persistence and the taxonomy mirror live under
//! `collector/src/outbound`. Settings, the campaign registry and the binary
//! wire both layers together at startup and are off limits to either.
//!
//! Each layer carries a [`BoundaryRule`] naming the crate modules and
//! external crates it may not mention. Every `use` tree and path expression
//! is walked with `syn`, so a fully qualified call is caught as readily as an
//! import.
//!
//! Run it with `cargo run -p architecture-lint`.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use syn::visit::Visit;

/// Top-level modules of the collector crate.
const CRATE_MODULES: [&str; 4] = ["domain", "outbound", "settings", "campaign_registry"];

/// Startup wiring that neither layer may depend on.
const STARTUP_MODULES: [&str; 2] = ["settings", "campaign_registry"];

static RULES: [BoundaryRule; 2] = [
    BoundaryRule {
        layer: Layer::Domain,
        modules: &["outbound", "settings", "campaign_registry"],
        crates: &[
            "cap_std",
            "clap",
            "csv",
            "ortho_config",
            "reqwest",
            "tracing_subscriber",
        ],
    },
    BoundaryRule {
        layer: Layer::Outbound,
        modules: &STARTUP_MODULES,
        crates: &["clap", "ortho_config", "tracing_subscriber"],
    },
];

/// Source directory checked by the lint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    /// Aggregation logic and port traits.
    Domain,
    /// Adapters implementing the ports.
    Outbound,
}

impl Layer {
    /// Directory of the layer under `collector/src`.
    #[must_use]
    pub const fn dir(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// The forbidden target a file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reach {
    /// A module of the collector crate.
    Module(&'static str),
    /// An external crate.
    Crate(&'static str),
}

/// A file that names something its layer may not depend on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Violation {
    /// File path relative to `collector/src`.
    pub file: PathBuf,
    /// Layer the file belongs to.
    pub layer: Layer,
    /// What the file reached for.
    pub reach: Reach,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { file, layer, reach } = self;
        match reach {
            Reach::Module(name) => {
                write!(f, "{}: {layer} code must not use crate::{name}", file.display())
            }
            Reach::Crate(name) => {
                write!(f, "{}: {layer} code must not use the `{name}` crate", file.display())
            }
        }
    }
}

/// Failure modes of the boundary check.
#[derive(Debug, thiserror::Error)]
pub enum ArchitectureLintError {
    /// Walking or reading the source tree failed.
    #[error("reading collector sources failed: {0}")]
    Io(#[from] io::Error),
    /// A file is not valid Rust.
    #[error("{}: not valid Rust: {message}", file.display())]
    Parse {
        /// File path relative to `collector/src`.
        file: PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// A file sits outside every checked layer.
    #[error("{} is outside the domain and outbound layers", .0.display())]
    UnknownLayer(PathBuf),
    /// At least one file crossed a boundary.
    #[error("{}", render_violations(.0))]
    Violations(Vec<Violation>),
}

fn render_violations(violations: &[Violation]) -> String {
    let mut rendered = format!("{} boundary violation(s):", violations.len());
    for violation in violations {
        rendered.push_str("\n- ");
        rendered.push_str(&violation.to_string());
    }
    rendered
}

/// A Rust source file to be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintSource {
    /// Path relative to `collector/src`.
    pub file: PathBuf,
    /// Rust source text.
    pub contents: String,
}

/// Check the `domain` and `outbound` trees of a collector crate on disk.
///
/// `collector_dir` is the directory holding the crate's `src/`.
///
/// # Errors
///
/// Returns [`ArchitectureLintError`] when the tree cannot be read, a file
/// does not parse, or any boundary is crossed.
pub fn lint_collector_sources(collector_dir: &Path) -> Result<(), ArchitectureLintError> {
    let sources = layer_sources(&collector_dir.join("src"))?;
    lint_sources(&sources)
}

/// Check in-memory sources.
///
/// # Errors
///
/// Returns [`ArchitectureLintError`] for a file outside the layers, a file
/// that does not parse, or any boundary crossing.
pub fn lint_sources(sources: &[LintSource]) -> Result<(), ArchitectureLintError> {
    let mut violations = Vec::new();
    for source in sources {
        let rule = BoundaryRule::for_file(&source.file)
            .ok_or_else(|| ArchitectureLintError::UnknownLayer(source.file.clone()))?;
        let parsed =
            syn::parse_file(&source.contents).map_err(|err| ArchitectureLintError::Parse {
                file: source.file.clone(),
                message: err.to_string(),
            })?;
        violations.extend(rule.check(&source.file, &parsed));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ArchitectureLintError::Violations(violations))
    }
}

/// Modules and crates one layer may not name.
#[derive(Debug)]
pub struct BoundaryRule {
    layer: Layer,
    modules: &'static [&'static str],
    crates: &'static [&'static str],
}

impl BoundaryRule {
    fn for_file(relative: &Path) -> Option<&'static Self> {
        let top = relative.components().next()?.as_os_str();
        RULES.iter().find(|rule| top == rule.layer.dir())
    }

    fn check(&self, file: &Path, parsed: &syn::File) -> Vec<Violation> {
        let mut walker = ReferenceWalker::default();
        walker.visit_file(parsed);
        let reached = walker
            .references
            .iter()
            .filter_map(|segments| self.forbidden(segments))
            .collect::<BTreeSet<_>>();
        reached
            .into_iter()
            .map(|reach| Violation {
                file: file.to_path_buf(),
                layer: self.layer,
                reach,
            })
            .collect()
    }

    fn forbidden(&self, segments: &[String]) -> Option<Reach> {
        match Target::of(segments)? {
            Target::Local(name) => self
                .modules
                .iter()
                .copied()
                .find(|module| *module == name)
                .map(Reach::Module),
            Target::External(name) => self
                .crates
                .iter()
                .copied()
                .find(|krate| *krate == name)
                .map(Reach::Crate),
        }
    }
}

/// First meaningful segment of a path.
enum Target<'a> {
    Local(&'a str),
    External(&'a str),
}

impl<'a> Target<'a> {
    fn of(segments: &'a [String]) -> Option<Self> {
        let (first, rest) = segments.split_first()?;
        match first.as_str() {
            "crate" | "self" | "super" | "collector" => rest
                .iter()
                .map(String::as_str)
                .find(|segment| !matches!(*segment, "self" | "super"))
                .map(Self::Local),
            name if CRATE_MODULES.contains(&name) => Some(Self::Local(name)),
            name => Some(Self::External(name)),
        }
    }
}

/// Every path a file mentions, with `use` groups flattened.
#[derive(Default)]
struct ReferenceWalker {
    references: BTreeSet<Vec<String>>,
}

impl ReferenceWalker {
    fn flatten_use(&mut self, tree: &syn::UseTree, prefix: &mut Vec<String>) {
        let leaf = match tree {
            syn::UseTree::Path(path) => {
                prefix.push(path.ident.to_string());
                self.flatten_use(&path.tree, prefix);
                prefix.pop();
                return;
            }
            syn::UseTree::Group(group) => {
                for item in &group.items {
                    self.flatten_use(item, prefix);
                }
                return;
            }
            syn::UseTree::Name(name) => name.ident.to_string(),
            syn::UseTree::Rename(rename) => rename.ident.to_string(),
            syn::UseTree::Glob(_) => "*".to_owned(),
        };
        let mut segments = prefix.clone();
        segments.push(leaf);
        self.references.insert(segments);
    }
}

impl<'ast> Visit<'ast> for ReferenceWalker {
    fn visit_path(&mut self, node: &'ast syn::Path) {
        let segments = node
            .segments
            .iter()
            .map(|segment| segment.ident.to_string())
            .collect::<Vec<_>>();
        if !segments.is_empty() {
            self.references.insert(segments);
        }
        syn::visit::visit_path(self, node);
    }

    fn visit_item_use(&mut self, node: &'ast syn::ItemUse) {
        self.flatten_use(&node.tree, &mut Vec::new());
    }
}

/// Rust files under the checked layer directories, sorted by path.
fn layer_sources(src_dir: &Path) -> Result<Vec<LintSource>, ArchitectureLintError> {
    let mut pending = RULES
        .iter()
        .map(|rule| src_dir.join(rule.layer.dir()))
        .filter(|dir| dir.is_dir())
        .collect::<Vec<_>>();
    let mut sources = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                let file = path
                    .strip_prefix(src_dir)
                    .map_or_else(|_| path.clone(), Path::to_path_buf);
                sources.push(LintSource {
                    contents: fs::read_to_string(&path)?,
                    file,
                });
            }
        }
    }
    sources.sort_by(|left, right| left.file.cmp(&right.file));
    Ok(sources)
}
