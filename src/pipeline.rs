//! The manual pipeline.
//!
//! Wires the stages together and owns the phase order:
//!
//! ```text
//! module sets ──(par_iter)──► normalize ─► export JSON ─► fragment (cached)
//!                                                            │
//!                                      barrier: all fragments│
//!                                                            ▼
//! docs/ + fragments ─► CombinedManual ─validate─► ValidatedManual
//!                   ─collect_targets─► CollectedManual ─render─► RenderedManual
//!                                                    (html ∥ man)
//! ```
//!
//! The document phases are distinct types, so a renderer cannot see a tree
//! that was not validated or whose targets were not collected. A
//! [`CollectedManual`] owns its trees and target database behind `Arc`s and
//! is only read from then on; the HTML and man renderers run on it
//! concurrently.
//!
//! Nothing is written to the output directory until every phase, rendering
//! included, has succeeded. Fragments and the fragment cache live in the work
//! directory.

use crate::cache::{CacheManifest, CacheStats, fragment_input_hash};
use crate::combine::{self, CombineError, CombinedTrees, DocumentValidationError, Overlay};
use crate::config::{self, BuildConfig, ConfigError, ModuleSetConfig};
use crate::export::{self, ExportError};
use crate::fragment::{self, Fragment, FragmentParams};
use crate::normalize::{self, NormalizeContext, NormalizeError, RawOption, RootPrefixes};
use crate::packages::{RepositoryError, StaticRepository};
use crate::targets::{self, CrossReferenceError, TargetDatabase, TargetError, TocDescriptor};
use crate::types::{OptionDoc, RenderedFile};
use crate::xml::Element;
use crate::{html, man};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    CrossReference(#[from] CrossReferenceError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("package repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Roots(NormalizeError),
    #[error("module set `{set}`: cannot read {}: {source}", .path.display())]
    ReadOptions {
        set: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("module set `{set}`: invalid option list {}: {source}", .path.display())]
    ParseOptions {
        set: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("module set `{set}`: {source}")]
    Normalize {
        set: String,
        #[source]
        source: NormalizeError,
    },
    #[error("module set `{set}`: {source}")]
    Export {
        set: String,
        #[source]
        source: ExportError,
    },
    #[error(transparent)]
    Combine(#[from] CombineError),
    #[error(transparent)]
    Validation(#[from] DocumentValidationError),
    #[error(transparent)]
    Targets(#[from] TargetError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<CrossReferenceError> for BuildError {
    fn from(err: CrossReferenceError) -> Self {
        BuildError::Render(err.into())
    }
}

// ============================================================================
// Project
// ============================================================================

/// A loaded configuration and the directory its relative paths start from.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: BuildConfig,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, config: BuildConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Load `optdoc.toml`; a missing file gives the stock defaults.
    pub fn load(config_path: &Path) -> Result<Self, BuildError> {
        let config = config::load_config(config_path)?;
        let root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Ok(Self::new(root, config))
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.path(&self.config.documents)
    }

    /// `share/doc/<path_name>` below `output`.
    pub fn doc_dir(&self, output: &Path) -> PathBuf {
        output.join("share/doc").join(&self.config.path_name)
    }

    pub fn options_dir(&self, output: &Path) -> PathBuf {
        self.doc_dir(output).join("options")
    }

    pub fn man_dir(&self, output: &Path) -> PathBuf {
        output.join("share/man")
    }

    fn repository(&self) -> Result<StaticRepository, BuildError> {
        match &self.config.packages {
            Some(packages) => Ok(StaticRepository::load(&self.path(packages))?),
            None => Ok(StaticRepository::new()),
        }
    }
}

// ============================================================================
// Stage 1: normalize and export
// ============================================================================

/// One module set after normalization and export.
#[derive(Debug, Clone)]
pub struct ExportedSet {
    pub name: String,
    pub fragment_id: String,
    pub id_prefix: Option<String>,
    pub options: Vec<OptionDoc>,
    /// Raw options dropped as invisible or internal.
    pub dropped: usize,
    /// Canonical JSON of `options`.
    pub json: String,
}

impl ExportedSet {
    pub fn fragment_params<'a>(&'a self, config: &'a BuildConfig) -> FragmentParams<'a> {
        FragmentParams {
            id: &self.fragment_id,
            id_prefix: self.id_prefix.as_deref(),
            channel_name: &config.channel_name,
            document_type: config.document_type,
        }
    }

    pub fn json_file_name(&self) -> String {
        format!("{}.json", self.fragment_id)
    }
}

/// Normalize and export every module set in parallel.
///
/// Every set runs to completion; the first failure in configuration order is
/// returned.
pub fn export_module_sets(project: &Project) -> Result<Vec<ExportedSet>, BuildError> {
    let repository = project.repository()?;
    let roots = RootPrefixes::new(&project.config.module_roots).map_err(BuildError::Roots)?;
    let links = project.config.declaration_links();
    let ctx = NormalizeContext {
        roots: &roots,
        links: &links,
        packages: &repository,
    };

    let results: Vec<Result<ExportedSet, BuildError>> = project
        .config
        .module_sets
        .par_iter()
        .map(|set| export_module_set(project, set, &ctx))
        .collect();
    let sets = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    info!(sets = sets.len(), "exported module sets");
    Ok(sets)
}

fn export_module_set(
    project: &Project,
    set: &ModuleSetConfig,
    ctx: &NormalizeContext<'_>,
) -> Result<ExportedSet, BuildError> {
    let mut raw = read_raw_options(project, set, &set.options)?;
    if let Some(overrides) = &set.overrides {
        let overrides = read_raw_options(project, set, overrides)?;
        raw = normalize::merge_overrides(raw, overrides);
    }

    let normalized = normalize::normalize(raw, ctx).map_err(|source| BuildError::Normalize {
        set: set.name.clone(),
        source,
    })?;
    let json = export::to_json(&normalized.options).map_err(|source| BuildError::Export {
        set: set.name.clone(),
        source,
    })?;
    debug!(
        set = %set.name,
        options = normalized.options.len(),
        dropped = normalized.dropped,
        "normalized module set"
    );

    Ok(ExportedSet {
        name: set.name.clone(),
        fragment_id: set.fragment_id.clone(),
        id_prefix: set.id_prefix.clone(),
        options: normalized.options,
        dropped: normalized.dropped,
        json,
    })
}

fn read_raw_options(project: &Project, set: &ModuleSetConfig, file: &str) -> Result<Vec<RawOption>, BuildError> {
    let path = project.path(file);
    let text = fs::read_to_string(&path).map_err(|source| BuildError::ReadOptions {
        set: set.name.clone(),
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| BuildError::ParseOptions {
        set: set.name.clone(),
        path,
        source,
    })
}

// ============================================================================
// Stage 2: fragments
// ============================================================================

/// A fragment and the module set it documents.
#[derive(Debug, Clone)]
pub struct RenderedFragment {
    pub module_set: String,
    pub fragment: Fragment,
    pub cached: bool,
}

/// Render every module set's fragment into `work_dir`, reusing cached
/// fragments whose inputs did not change.
pub fn render_fragments(
    project: &Project,
    sets: &[ExportedSet],
    work_dir: &Path,
    use_cache: bool,
) -> Result<(Vec<RenderedFragment>, CacheStats), BuildError> {
    fs::create_dir_all(work_dir)?;
    let mut manifest = if use_cache {
        CacheManifest::load(work_dir)
    } else {
        CacheManifest::empty()
    };

    let rendered: Vec<(RenderedFragment, String)> = sets
        .par_iter()
        .map(|set| {
            let params = set.fragment_params(&project.config);
            let input_hash = fragment_input_hash(&set.json, &params);
            let cached = manifest
                .find_cached(params.id, &input_hash, work_dir)
                .and_then(|file| fs::read_to_string(work_dir.join(file)).ok());
            let (fragment, cached) = match cached {
                Some(content) => (
                    Fragment {
                        id: set.fragment_id.clone(),
                        id_prefix: params.id_prefix().to_string(),
                        document_type: params.document_type,
                        content,
                    },
                    true,
                ),
                None => (fragment::render(&set.options, &params), false),
            };
            let rendered = RenderedFragment {
                module_set: set.name.clone(),
                fragment,
                cached,
            };
            (rendered, input_hash)
        })
        .collect();

    let mut stats = CacheStats::default();
    let mut fragments = Vec::with_capacity(rendered.len());
    for (rendered, input_hash) in rendered {
        let file = rendered.fragment.file_name();
        if rendered.cached {
            stats.hit();
        } else {
            stats.miss();
            fs::write(work_dir.join(&file), &rendered.fragment.content)?;
            debug!(id = %rendered.fragment.id, digest = %rendered.fragment.digest(), "wrote fragment");
        }
        manifest.insert(rendered.fragment.id.clone(), input_hash, file);
        fragments.push(rendered);
    }
    manifest.retain_ids(sets.iter().map(|s| s.fragment_id.as_str()));
    manifest.save(work_dir)?;

    info!(%stats, "rendered fragments");
    Ok((fragments, stats))
}

// ============================================================================
// Stages 3-5: document phases
// ============================================================================

/// Resolved documents, not yet validated.
#[derive(Debug)]
pub struct CombinedManual {
    overlay: Overlay,
    trees: CombinedTrees,
}

impl CombinedManual {
    /// Overlay the document directory and the fragments, then resolve both
    /// roots.
    pub fn combine(docs_dir: &Path, fragments: &[RenderedFragment]) -> Result<Self, CombineError> {
        let mut overlay = Overlay::load(docs_dir)?;
        for rendered in fragments {
            overlay.add_fragment(&rendered.fragment, &rendered.module_set)?;
        }
        let trees = combine::combine(&overlay)?;
        Ok(Self { overlay, trees })
    }

    /// Number of overlaid input files.
    pub fn inputs(&self) -> usize {
        self.overlay.len()
    }

    pub fn validate(self) -> Result<ValidatedManual, DocumentValidationError> {
        combine::validate(&self.trees, &self.overlay)?;
        debug!(inputs = self.overlay.len(), "validated documents");
        Ok(ValidatedManual { trees: self.trees })
    }
}

/// Trees that passed the structural schema.
#[derive(Debug)]
pub struct ValidatedManual {
    trees: CombinedTrees,
}

impl ValidatedManual {
    pub fn collect_targets(self, toc: TocDescriptor) -> Result<CollectedManual, TargetError> {
        let db = targets::collect(&self.trees.book, &self.trees.man, &toc)?;
        Ok(CollectedManual {
            book: Arc::new(self.trees.book),
            man: Arc::new(self.trees.man),
            db: Arc::new(db),
            toc: Arc::new(toc),
        })
    }
}

/// Validated trees together with their target database. Immutable.
#[derive(Debug, Clone)]
pub struct CollectedManual {
    book: Arc<Element>,
    man: Arc<Element>,
    db: Arc<TargetDatabase>,
    toc: Arc<TocDescriptor>,
}

impl CollectedManual {
    pub fn book(&self) -> &Element {
        &self.book
    }

    pub fn man(&self) -> &Element {
        &self.man
    }

    pub fn targets(&self) -> &TargetDatabase {
        &self.db
    }

    pub fn toc(&self) -> &TocDescriptor {
        &self.toc
    }

    /// Run the HTML and man renderers concurrently.
    pub fn render(&self, source: &str) -> Result<RenderedManual, CrossReferenceError> {
        let (html, man) = rayon::join(|| render_html(self), || render_man(self, source));
        let manual = RenderedManual { html: html?, man: man? };
        info!(html = manual.html.len(), man = manual.man.len(), "rendered manual");
        Ok(manual)
    }
}

pub fn render_html(manual: &CollectedManual) -> Result<Vec<RenderedFile>, CrossReferenceError> {
    html::render(manual.book(), manual.targets(), manual.toc())
}

pub fn render_man(manual: &CollectedManual, source: &str) -> Result<Vec<RenderedFile>, CrossReferenceError> {
    man::render(manual.man(), manual.targets(), source)
}

/// Rendered output, relative to its output roots.
#[derive(Debug, Clone)]
pub struct RenderedManual {
    pub html: Vec<RenderedFile>,
    pub man: Vec<RenderedFile>,
}

// ============================================================================
// Output
// ============================================================================

/// Write `files` below `root`, creating directories as needed. Returns the
/// written paths.
pub fn write_files(root: &Path, files: &[RenderedFile]) -> io::Result<Vec<PathBuf>> {
    files
        .iter()
        .map(|file| {
            let path = root.join(&file.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &file.contents)?;
            Ok(path)
        })
        .collect()
}

fn json_files(sets: &[ExportedSet]) -> Vec<RenderedFile> {
    sets.iter()
        .map(|set| RenderedFile::new(set.json_file_name(), set.json.clone()))
        .collect()
}

// ============================================================================
// Commands
// ============================================================================

/// Per-set numbers for the CLI summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSummary {
    pub name: String,
    pub fragment_id: String,
    pub options: usize,
    pub dropped: usize,
}

impl From<&ExportedSet> for SetSummary {
    fn from(set: &ExportedSet) -> Self {
        Self {
            name: set.name.clone(),
            fragment_id: set.fragment_id.clone(),
            options: set.options.len(),
            dropped: set.dropped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub sets: Vec<SetSummary>,
    pub json: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSummary {
    pub sets: Vec<SetSummary>,
    pub fragments: Vec<PathBuf>,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub sets: Vec<SetSummary>,
    pub inputs: usize,
    pub targets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub sets: Vec<SetSummary>,
    pub cache: CacheStats,
    pub inputs: usize,
    pub targets: usize,
    pub json: Vec<PathBuf>,
    pub html: Vec<PathBuf>,
    pub man: Vec<PathBuf>,
}

/// Normalize every module set and write its canonical JSON.
pub fn run_export(project: &Project, output: &Path) -> Result<ExportSummary, BuildError> {
    let sets = export_module_sets(project)?;
    let json = write_files(&project.options_dir(output), &json_files(&sets))?;
    Ok(ExportSummary {
        sets: sets.iter().map(SetSummary::from).collect(),
        json,
    })
}

/// Normalize every module set and render its fragment into `work_dir`.
pub fn run_fragments(project: &Project, work_dir: &Path, use_cache: bool) -> Result<FragmentSummary, BuildError> {
    let sets = export_module_sets(project)?;
    let (fragments, cache) = render_fragments(project, &sets, work_dir, use_cache)?;
    Ok(FragmentSummary {
        sets: sets.iter().map(SetSummary::from).collect(),
        fragments: fragments
            .iter()
            .map(|f| work_dir.join(f.fragment.file_name()))
            .collect(),
        cache,
    })
}

/// Everything up to target collection, without writing output.
pub fn run_check(project: &Project, work_dir: &Path) -> Result<CheckSummary, BuildError> {
    let sets = export_module_sets(project)?;
    let (fragments, _) = render_fragments(project, &sets, work_dir, true)?;
    let combined = CombinedManual::combine(&project.documents_dir(), &fragments)?;
    let inputs = combined.inputs();
    let collected = combined
        .validate()?
        .collect_targets(project.config.toc_descriptor())?;
    Ok(CheckSummary {
        sets: sets.iter().map(SetSummary::from).collect(),
        inputs,
        targets: collected.targets().len(),
    })
}

/// The full pipeline. Output is written only once rendering succeeded.
pub fn run_build(
    project: &Project,
    output: &Path,
    work_dir: &Path,
    use_cache: bool,
) -> Result<BuildSummary, BuildError> {
    let sets = export_module_sets(project)?;
    let (fragments, cache) = render_fragments(project, &sets, work_dir, use_cache)?;

    let combined = CombinedManual::combine(&project.documents_dir(), &fragments)?;
    let inputs = combined.inputs();
    let collected = combined
        .validate()?
        .collect_targets(project.config.toc_descriptor())?;
    let rendered = collected.render(&project.config.path_name)?;

    let json = write_files(&project.options_dir(output), &json_files(&sets)).map_err(RenderError::from)?;
    let html = write_files(&project.doc_dir(output), &rendered.html).map_err(RenderError::from)?;
    let man = write_files(&project.man_dir(output), &rendered.man).map_err(RenderError::from)?;
    info!(output = %output.display(), "build complete");

    Ok(BuildSummary {
        sets: sets.iter().map(SetSummary::from).collect(),
        cache,
        inputs,
        targets: collected.targets().len(),
        json,
        html,
        man,
    })
}
