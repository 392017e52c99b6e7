//! Build configuration.
//!
//! Handles loading, validating, and merging `optdoc.toml`. Stock defaults are
//! serialized to a TOML value and the user file is merged on top, so a
//! project file only needs the keys it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! path_name = "manual"             # output namespace under share/doc/
//! document_type = "book"           # book | article | manpage
//! documents = "docs"               # hand-authored document directory
//! packages = "packages.json"       # optional package repository
//! module_roots = ["/build/src/"]   # absolute prefixes stripped from declarations
//! declaration_url = "https://example.org/src/{path}"
//! channel_path = "<modules/{path}>"
//! channel_name = "modules"
//!
//! [[toc]]
//! section = "ch-options"           # xml:id of a chunked section
//! file = "options.html"
//!
//! [[module_sets]]
//! name = "core"
//! options = "options.json"         # raw option list
//! fragment_id = "module-opts"
//! id_prefix = "opt"                # optional, anchor prefix
//! overrides = "overrides.json"     # optional, raw options merged on top
//!
//! [processing]
//! max_threads = 4                  # omit for all cores
//! ```
//!
//! Relative paths are resolved against the directory holding the config
//! file. Unknown keys are rejected to catch typos early.

use crate::fragment::DocumentType;
use crate::normalize::TemplateLinks;
use crate::targets::{FALLBACK_FILE, TocDescriptor, TocEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default config file name.
pub const CONFIG_FILE: &str = "optdoc.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `optdoc.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Namespace of the documentation output: `share/doc/<path_name>/`.
    pub path_name: String,
    pub document_type: DocumentType,
    /// Directory holding `manual.xml`, `manpages.xml` and their includes.
    pub documents: String,
    /// Package repository JSON; related packages are unresolvable without it.
    pub packages: Option<String>,
    /// Absolute source prefixes stripped from declaration paths.
    pub module_roots: Vec<String>,
    /// Declaration link template, `{path}` is the stripped path.
    pub declaration_url: String,
    /// Declaration display template, `{path}` is the stripped path.
    pub channel_path: String,
    /// Name shown in fragment introductions.
    pub channel_name: String,
    pub toc: Vec<TocEntry>,
    pub module_sets: Vec<ModuleSetConfig>,
    pub processing: ProcessingConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            path_name: "manual".to_string(),
            document_type: DocumentType::default(),
            documents: "docs".to_string(),
            packages: None,
            module_roots: Vec::new(),
            declaration_url: TemplateLinks::PLACEHOLDER.to_string(),
            channel_path: format!("<{}>", TemplateLinks::PLACEHOLDER),
            channel_name: "options".to_string(),
            toc: Vec::new(),
            module_sets: Vec::new(),
            processing: ProcessingConfig::default(),
        }
    }
}

/// One independently evaluated module set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSetConfig {
    pub name: String,
    /// Raw option list JSON.
    pub options: String,
    pub fragment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,
    /// Raw options merged over `options` by location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<String>,
}

impl BuildConfig {
    /// Validate values that deserialization cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path_name.trim().is_empty() {
            return Err(ConfigError::Validation("path_name must not be empty".into()));
        }
        if let Some(root) = self.module_roots.iter().find(|r| !r.starts_with('/')) {
            return Err(ConfigError::Validation(format!(
                "module_roots entry `{root}` must be an absolute path"
            )));
        }
        for (key, template) in [
            ("declaration_url", &self.declaration_url),
            ("channel_path", &self.channel_path),
        ] {
            if !template.contains(TemplateLinks::PLACEHOLDER) {
                return Err(ConfigError::Validation(format!(
                    "{key} must contain {}",
                    TemplateLinks::PLACEHOLDER
                )));
            }
        }

        let mut names = BTreeSet::new();
        let mut fragment_ids = BTreeSet::new();
        for set in &self.module_sets {
            if !names.insert(set.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "module set `{}` is declared twice",
                    set.name
                )));
            }
            if set.fragment_id.is_empty() || set.fragment_id.contains('/') {
                return Err(ConfigError::Validation(format!(
                    "module set `{}` has invalid fragment_id `{}`",
                    set.name, set.fragment_id
                )));
            }
            if !fragment_ids.insert(set.fragment_id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "fragment_id `{}` is used by more than one module set",
                    set.fragment_id
                )));
            }
        }

        let mut sections = BTreeSet::new();
        let mut files = BTreeSet::new();
        for entry in &self.toc {
            if !entry.file.ends_with(".html") || entry.file == FALLBACK_FILE {
                return Err(ConfigError::Validation(format!(
                    "toc file `{}` must end in .html and not be {FALLBACK_FILE}",
                    entry.file
                )));
            }
            if !sections.insert(entry.section.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "toc section `{}` is listed twice",
                    entry.section
                )));
            }
            if !files.insert(entry.file.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "toc file `{}` is listed twice",
                    entry.file
                )));
            }
        }
        Ok(())
    }

    pub fn toc_descriptor(&self) -> TocDescriptor {
        TocDescriptor::new(self.toc.clone())
    }

    pub fn declaration_links(&self) -> TemplateLinks {
        TemplateLinks::new(&self.declaration_url, &self.channel_path)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of worker threads.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.clamp(1, cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(BuildConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay, arrays included, replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<BuildConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BuildConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path` over the stock defaults.
pub fn load_config(path: &Path) -> Result<BuildConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `optdoc.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# optdoc Configuration
# ====================
# All top-level settings are optional. Values shown below are the defaults.
# Relative paths are resolved against the directory holding this file.
# Unknown keys will cause an error.

# Output namespace: documentation lands in share/doc/<path_name>/.
path_name = "manual"

# Shape of the option fragments: "book" (appendix), "article" (section)
# or "manpage" (refsection).
document_type = "book"

# Directory with the hand-authored manual.xml and manpages.xml.
documents = "docs"

# Package repository used to resolve related packages:
# a JSON object mapping dotted attribute paths to package metadata.
# packages = "packages.json"

# ---------------------------------------------------------------------------
# Declarations
# ---------------------------------------------------------------------------
# Absolute source prefixes removed from declaration paths.
# The longest matching prefix wins.
module_roots = []

# Link and display templates. {path} is the stripped declaration path.
declaration_url = "{path}"
channel_path = "<{path}>"

# Name shown in the introduction of every options fragment.
channel_name = "options"

# ---------------------------------------------------------------------------
# Chunking
# ---------------------------------------------------------------------------
# Sections rendered to a page of their own. Everything else lands in
# index.html.
#
# [[toc]]
# section = "ch-options"
# file = "options.html"

# ---------------------------------------------------------------------------
# Module sets
# ---------------------------------------------------------------------------
# One entry per evaluated module set. Each produces a fragment that
# manual.xml can include as <fragment_id>.xml.
#
# [[module_sets]]
# name = "core"
# options = "options.json"
# fragment_id = "module-opts"
# id_prefix = "opt"
# overrides = "overrides.json"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum worker threads.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn module_set(name: &str, fragment_id: &str) -> ModuleSetConfig {
        ModuleSetConfig {
            name: name.to_string(),
            options: format!("{name}.json"),
            fragment_id: fragment_id.to_string(),
            id_prefix: None,
            overrides: None,
        }
    }

    fn validation_message(config: &BuildConfig) -> String {
        match config.validate() {
            Err(ConfigError::Validation(message)) => message,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = BuildConfig::default();
        config.validate().unwrap();
        assert_eq!(config.path_name, "manual");
        assert_eq!(config.document_type, DocumentType::Book);
        assert_eq!(config.documents, "docs");
        assert!(config.module_sets.is_empty());
    }

    #[test]
    fn stock_config_parses_to_defaults() {
        let config: BuildConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = BuildConfig::default();
        assert_eq!(config.path_name, defaults.path_name);
        assert_eq!(config.declaration_url, defaults.declaration_url);
        assert_eq!(config.channel_path, defaults.channel_path);
        assert_eq!(config.channel_name, defaults.channel_name);
        assert_eq!(config.processing.max_threads, None);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
path_name = "tool"
document_type = "manpage"
packages = "packages.json"
module_roots = ["/build/src/"]
declaration_url = "https://example.org/src/{path}"
channel_path = "<modules/{path}>"
channel_name = "modules"

[[toc]]
section = "ch-options"
file = "options.html"

[[module_sets]]
name = "core"
options = "options.json"
fragment_id = "module-opts"
id_prefix = "core"

[processing]
max_threads = 2
"#;
        let config: BuildConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.document_type, DocumentType::Manpage);
        assert_eq!(config.packages.as_deref(), Some("packages.json"));
        assert_eq!(config.toc_descriptor().file_for("ch-options"), Some("options.html"));
        assert_eq!(config.module_sets[0].id_prefix.as_deref(), Some("core"));
        assert_eq!(config.module_sets[0].overrides, None);
        assert_eq!(config.processing.max_threads, Some(2));
        // Unspecified defaults preserved
        assert_eq!(config.documents, "docs");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<BuildConfig>("colour = \"red\"").is_err());
        let toml = r#"
[[module_sets]]
name = "core"
options = "options.json"
fragment_id = "module-opts"
prefix = "x"
"#;
        assert!(toml::from_str::<BuildConfig>(toml).is_err());
    }

    #[test]
    fn unknown_document_type_is_rejected() {
        assert!(toml::from_str::<BuildConfig>("document_type = \"novel\"").is_err());
    }

    #[test]
    fn relative_module_root_is_rejected() {
        let config = BuildConfig {
            module_roots: vec!["build/src".to_string()],
            ..BuildConfig::default()
        };
        assert!(validation_message(&config).contains("absolute"));
    }

    #[test]
    fn templates_need_a_placeholder() {
        let config = BuildConfig {
            declaration_url: "https://example.org/".to_string(),
            ..BuildConfig::default()
        };
        assert!(validation_message(&config).contains("declaration_url"));
    }

    #[test]
    fn fragment_ids_must_be_unique() {
        let config = BuildConfig {
            module_sets: vec![module_set("core", "opts"), module_set("extra", "opts")],
            ..BuildConfig::default()
        };
        assert!(validation_message(&config).contains("`opts`"));
    }

    #[test]
    fn toc_files_are_checked() {
        let entry = |section: &str, file: &str| TocEntry {
            section: section.to_string(),
            file: file.to_string(),
        };
        let config = BuildConfig {
            toc: vec![entry("a", "index.html")],
            ..BuildConfig::default()
        };
        assert!(validation_message(&config).contains("index.html"));

        let config = BuildConfig {
            toc: vec![entry("a", "a.html"), entry("b", "a.html")],
            ..BuildConfig::default()
        };
        assert!(validation_message(&config).contains("listed twice"));
    }

    #[test]
    fn effective_threads_clamps_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig { max_threads: None }), cores);
        assert_eq!(
            effective_threads(&ProcessingConfig {
                max_threads: Some(cores + 10)
            }),
            cores
        );
        assert_eq!(effective_threads(&ProcessingConfig { max_threads: Some(1) }), 1);
    }

    // =========================================================================
    // merge and load
    // =========================================================================

    #[test]
    fn merge_toml_overrides_nested_keys() {
        let base: toml::Value = toml::from_str("a = 1\n[t]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[t]\ny = 3\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(1));
        assert_eq!(merged["t"]["x"].as_integer(), Some(1));
        assert_eq!(merged["t"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.path_name, "manual");
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(&path, "path_name = \"tool\"\n[processing]\nmax_threads = 3\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.path_name, "tool");
        assert_eq!(config.processing.max_threads, Some(3));
        assert_eq!(config.channel_name, "options");
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_validates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(&path, "path_name = \"\"\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));
    }
}
