//! Document combination.
//!
//! Stage 3 of the manual pipeline. Overlays the hand-authored document
//! directory and every rendered fragment into one set of files, then resolves
//! inclusion into one self-contained tree per root document.
//!
//! ## Overlay
//!
//! ```text
//! docs/                      overlay
//! ├── manual.xml       ──►   manual.xml
//! ├── manpages.xml     ──►   manpages.xml
//! └── ch/intro.xml     ──►   ch/intro.xml
//! fragment module-opts ──►   module-opts.xml
//! ```
//!
//! Overlay names are `/`-separated paths relative to the document directory.
//! A fragment whose name is already taken, or an `xml:id` declared by two
//! inputs, is an [`IdentifierConflictError`].
//!
//! ## Inclusion
//!
//! `<xi:include href="…"/>` is replaced by the root element of the named
//! overlay file, resolved relative to the including file. Missing targets and
//! cycles are errors. Identifiers are checked again inside each resolved
//! tree, which catches one file included twice.
//!
//! ## Validation
//!
//! [`validate`] checks both trees against [`crate::schema`]. Violations carry
//! the surrounding source lines.

use crate::fragment::Fragment;
use crate::schema::{self, BOOK_ROOT_ELEMENT, MAN_ROOT_ELEMENT};
use crate::xml::{self, Element, Node, Origin};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Book root document.
pub const BOOK_FILE: &str = "manual.xml";
/// Man-page reference root document.
pub const MAN_FILE: &str = "manpages.xml";

const INCLUDE_ELEMENT: &str = "xi:include";
const CONTEXT_RADIUS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("identifier `{id}` is declared by both {first} and {second}")]
pub struct IdentifierConflictError {
    pub id: String,
    pub first: String,
    pub second: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{file}:{line}: {message}\n{context}")]
pub struct DocumentValidationError {
    pub file: String,
    pub line: usize,
    pub message: String,
    /// Surrounding source lines, the offending one marked with `>`.
    pub context: String,
}

#[derive(Error, Debug)]
pub enum CombineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot read document directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Conflict(#[from] IdentifierConflictError),
    #[error(transparent)]
    Validation(#[from] DocumentValidationError),
    #[error("document directory has no `{0}`")]
    MissingRoot(&'static str),
    #[error("{origin}: <xi:include> without href")]
    IncludeWithoutHref { origin: Origin },
    #[error("{origin}: included file `{href}` does not exist")]
    MissingInclude { origin: Origin, href: String },
    #[error("inclusion cycle: {}", .0.join(" -> "))]
    IncludeCycle(Vec<String>),
}

/// Where an overlay file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Document(PathBuf),
    Fragment { id: String, module_set: String },
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Document(path) => write!(f, "{}", path.display()),
            Source::Fragment { id, module_set } => {
                write!(f, "fragment `{id}` of module set `{module_set}`")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub source: Source,
    pub text: String,
    pub root: Element,
}

/// All input files by overlay name.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    files: BTreeMap<String, SourceFile>,
}

impl Overlay {
    /// Load every `.xml` file below `docs_dir`.
    pub fn load(docs_dir: &Path) -> Result<Self, CombineError> {
        let mut overlay = Overlay::default();
        for entry in WalkDir::new(docs_dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "xml") {
                continue;
            }
            let name = overlay_name(path.strip_prefix(docs_dir).unwrap_or(path));
            let text = fs::read_to_string(path)?;
            overlay.insert(name, Source::Document(path.to_path_buf()), text)?;
        }
        debug!(files = overlay.len(), dir = %docs_dir.display(), "loaded documents");
        Ok(overlay)
    }

    /// Overlay a rendered fragment as `<id>.xml`.
    pub fn add_fragment(&mut self, fragment: &Fragment, module_set: &str) -> Result<(), CombineError> {
        let source = Source::Fragment {
            id: fragment.id.clone(),
            module_set: module_set.to_string(),
        };
        self.insert(fragment.file_name(), source, fragment.content.clone())
    }

    fn insert(&mut self, name: String, source: Source, text: String) -> Result<(), CombineError> {
        if let Some(existing) = self.files.get(&name) {
            let id = match (&existing.source, &source) {
                (Source::Fragment { id, .. }, Source::Fragment { .. }) => id.clone(),
                _ => name,
            };
            return Err(IdentifierConflictError {
                id,
                first: existing.source.to_string(),
                second: source.to_string(),
            }
            .into());
        }
        let root = xml::parse(&name, &text).map_err(|e| DocumentValidationError {
            context: xml::context_lines(&text, e.line, CONTEXT_RADIUS),
            file: e.file,
            line: e.line,
            message: format!("malformed XML: {}", e.message),
        })?;
        self.files.insert(name, SourceFile { source, text, root });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SourceFile> {
        self.files.get(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Every `xml:id` must be declared by exactly one input.
    pub fn check_identifiers(&self) -> Result<(), IdentifierConflictError> {
        check_unique(self.files.values().map(|file| &file.root), |origin| {
            self.describe(origin)
        })
    }

    /// Resolve all inclusions below the root document `name`.
    pub fn resolve(&self, name: &'static str) -> Result<Element, CombineError> {
        let file = self.files.get(name).ok_or(CombineError::MissingRoot(name))?;
        let mut chain = Vec::new();
        self.resolve_file(name, file, &mut chain)
    }

    fn resolve_file(
        &self,
        name: &str,
        file: &SourceFile,
        chain: &mut Vec<String>,
    ) -> Result<Element, CombineError> {
        let mut root = file.root.clone();
        chain.push(name.to_string());
        self.expand(&mut root, chain)?;
        chain.pop();
        Ok(root)
    }

    fn expand(&self, element: &mut Element, chain: &mut Vec<String>) -> Result<(), CombineError> {
        for node in &mut element.children {
            let Node::Element(child) = node else {
                continue;
            };
            if child.name != INCLUDE_ELEMENT {
                self.expand(child, chain)?;
                continue;
            }

            let href = child
                .attr("href")
                .ok_or_else(|| CombineError::IncludeWithoutHref {
                    origin: child.origin.clone(),
                })?;
            let target = join_href(&child.origin.file, href);
            if chain.contains(&target) {
                let mut cycle = chain.clone();
                cycle.push(target);
                return Err(CombineError::IncludeCycle(cycle));
            }
            let Some(file) = self.files.get(&target) else {
                return Err(CombineError::MissingInclude {
                    origin: child.origin.clone(),
                    href: href.to_string(),
                });
            };
            let included = self.resolve_file(&target, file, chain)?;
            *node = Node::Element(included);
        }
        Ok(())
    }

    /// `file:line`, naming the module set when the file is a fragment.
    fn describe(&self, origin: &Origin) -> String {
        match self.files.get(&*origin.file).map(|f| &f.source) {
            Some(source) if matches!(source, Source::Fragment { .. }) => {
                format!("{source} (line {})", origin.line)
            }
            _ => origin.to_string(),
        }
    }

    fn validation_error(&self, violation: schema::Violation) -> DocumentValidationError {
        let context = self
            .files
            .get(&violation.file)
            .map(|file| xml::context_lines(&file.text, violation.line, CONTEXT_RADIUS))
            .unwrap_or_default();
        DocumentValidationError {
            file: violation.file,
            line: violation.line,
            message: violation.message,
            context,
        }
    }
}

/// The resolved book and man-page trees.
#[derive(Debug, Clone)]
pub struct CombinedTrees {
    pub book: Element,
    pub man: Element,
}

/// Check identifiers across inputs, resolve both roots, then check
/// identifiers within each resolved tree.
pub fn combine(overlay: &Overlay) -> Result<CombinedTrees, CombineError> {
    overlay.check_identifiers()?;
    let book = overlay.resolve(BOOK_FILE)?;
    let man = overlay.resolve(MAN_FILE)?;
    for tree in [&book, &man] {
        check_unique(std::iter::once(tree), |origin| overlay.describe(origin))?;
    }
    debug!(inputs = overlay.len(), "combined documents");
    Ok(CombinedTrees { book, man })
}

/// Validate both resolved trees against the structural schema.
pub fn validate(trees: &CombinedTrees, overlay: &Overlay) -> Result<(), DocumentValidationError> {
    schema::validate(&trees.book, BOOK_ROOT_ELEMENT).map_err(|v| overlay.validation_error(v))?;
    schema::validate(&trees.man, MAN_ROOT_ELEMENT).map_err(|v| overlay.validation_error(v))?;
    Ok(())
}

fn check_unique<'a>(
    roots: impl Iterator<Item = &'a Element>,
    describe: impl Fn(&Origin) -> String,
) -> Result<(), IdentifierConflictError> {
    let mut seen: BTreeMap<&'a str, &'a Origin> = BTreeMap::new();
    let mut conflict = None;
    for root in roots {
        root.walk(&mut |element| {
            if conflict.is_some() {
                return;
            }
            if let Some(id) = element.id() {
                if let Some(first) = seen.insert(id, &element.origin) {
                    conflict = Some((id, first, &element.origin));
                }
            }
        });
        if let Some((id, first, second)) = conflict {
            return Err(IdentifierConflictError {
                id: id.to_string(),
                first: describe(first),
                second: describe(second),
            });
        }
    }
    Ok(())
}

fn overlay_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `href` against the directory of the overlay file `from`.
fn join_href(from: &str, href: &str) -> String {
    let mut segments: Vec<&str> = match from.rsplit_once('/') {
        Some((dir, _)) if !href.starts_with('/') => dir.split('/').collect(),
        _ => Vec::new(),
    };
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}
