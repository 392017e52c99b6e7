//! Option normalization.
//!
//! Stage 1 of the manual pipeline. Takes the raw option list exported by the
//! module evaluator and produces the canonical, ordered, fully serializable
//! list of [`OptionDoc`] records every later stage consumes.
//!
//! ## Steps
//!
//! 1. **Filter**: options with `visible: false` or `internal: true` are dropped.
//! 2. **Scrub**: `default`, `example` and `type` go through
//!    [`RawValue::scrub`], so function leaves become `"<function>"`.
//! 3. **Convert**: Markdown-tagged descriptions and `literalMD` values are
//!    converted to DocBook (see [`crate::markdown`]).
//! 4. **Strip**: declaration paths lose their local root prefix
//!    (`/build/src/modules/foo.nix` → `modules/foo.nix`) before URLs and
//!    channel paths are derived from them, so the build host's filesystem
//!    layout never reaches the manual.
//! 5. **Resolve**: related packages are looked up (see [`crate::packages`]).
//! 6. **Order**: by [`compare_locs`].
//! 7. **Check**: paths must be non-empty and unique.
//!
//! ## Ordering
//!
//! Paths are compared segment by segment. At the first differing segment a
//! segment starting with `enable` sorts before one starting with `package`,
//! which sorts before anything else; within a class segments compare
//! lexicographically. A path sorts before its own extensions. For the siblings
//! of `services.foo` this gives `enable`, `package`, then the rest:
//!
//! ```text
//! services.foo.enable
//! services.foo.package
//! services.foo.extraConfig
//! services.foo.port
//! ```
//!
//! ## Overrides
//!
//! A module set can ship an override list for options it does not evaluate
//! itself. [`merge_overrides`] folds it into the evaluated list by path.

use crate::markdown::{self, MarkdownError};
use crate::packages::{self, PackageRepository, PackageResolutionError, PackageSpec};
use crate::types::{Declaration, OptionDoc, SchemaError};
use crate::value::RawValue;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Placeholder type of options declared without a type.
pub const UNSPECIFIED_TYPE: &str = "_unspecified";

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("option `{option}`: {source}")]
    Package {
        option: String,
        #[source]
        source: PackageResolutionError,
    },
    #[error("option `{option}`: {source}")]
    Markdown {
        option: String,
        #[source]
        source: MarkdownError,
    },
    #[error("option `{option}`: unknown description type `{kind}`")]
    DescriptionKind { option: String, kind: String },
    #[error("root prefix `{0}` must be an absolute path")]
    RelativeRootPrefix(String),
}

/// One option as exported by the module evaluator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOption {
    pub loc: Vec<String>,
    #[serde(rename = "type", default, deserialize_with = "present")]
    pub option_type: Option<RawValue>,
    #[serde(default, deserialize_with = "present")]
    pub default: Option<RawValue>,
    #[serde(default, deserialize_with = "present")]
    pub example: Option<RawValue>,
    #[serde(default)]
    pub description: Option<RawDescription>,
    #[serde(default)]
    pub declarations: Vec<RawDeclaration>,
    #[serde(default)]
    pub related_packages: Option<Vec<PackageSpec>>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub internal: Option<bool>,
}

/// Keep an explicit `null` as `Some(RawValue::Null)`; only a missing field is `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<RawValue>, D::Error> {
    RawValue::deserialize(deserializer).map(Some)
}

impl RawOption {
    pub fn new(loc: &[&str]) -> Self {
        Self {
            loc: loc.iter().map(|s| s.to_string()).collect(),
            option_type: None,
            default: None,
            example: None,
            description: None,
            declarations: Vec::new(),
            related_packages: None,
            visible: None,
            internal: None,
        }
    }

    pub fn name(&self) -> String {
        self.loc.join(".")
    }

    fn is_documented(&self) -> bool {
        self.visible.unwrap_or(true) && !self.internal.unwrap_or(false)
    }
}

/// A description is DocBook text, or text tagged with its markup language.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawDescription {
    DocBook(String),
    Tagged {
        #[serde(rename = "_type")]
        kind: String,
        text: String,
    },
}

/// A declaration is a source path, or a path with a URL supplied by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawDeclaration {
    Path(String),
    Linked {
        #[serde(alias = "name")]
        path: String,
        url: String,
    },
}

impl RawDeclaration {
    fn path(&self) -> &str {
        match self {
            RawDeclaration::Path(path) | RawDeclaration::Linked { path, .. } => path,
        }
    }
}

/// Absolute directory prefixes removed from declaration paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootPrefixes(Vec<String>);

impl RootPrefixes {
    /// Every prefix must be absolute; a trailing `/` is added when missing.
    pub fn new<I, S>(prefixes: I) -> Result<Self, NormalizeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        prefixes
            .into_iter()
            .map(|prefix| {
                let mut prefix = prefix.into();
                if !prefix.starts_with('/') {
                    return Err(NormalizeError::RelativeRootPrefix(prefix));
                }
                if !prefix.ends_with('/') {
                    prefix.push('/');
                }
                Ok(prefix)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(RootPrefixes)
    }

    /// Remove the longest matching prefix.
    ///
    /// The result never starts with `/`, so no absolute prefix can match it
    /// again and stripping is idempotent.
    pub fn strip<'a>(&self, path: &'a str) -> &'a str {
        self.0
            .iter()
            .filter(|prefix| path.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())
            .map_or(path, |prefix| path[prefix.len()..].trim_start_matches('/'))
    }
}

/// Derives the public URL and the channel display path of a declaration.
pub trait DeclarationLinks: Sync {
    fn url(&self, path: &str) -> String;
    fn channel_path(&self, path: &str) -> String;
}

/// [`DeclarationLinks`] from two templates in which `{path}` is replaced by
/// the stripped declaration path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLinks {
    pub url: String,
    pub channel_path: String,
}

impl TemplateLinks {
    pub const PLACEHOLDER: &'static str = "{path}";

    pub fn new(url: impl Into<String>, channel_path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel_path: channel_path.into(),
        }
    }
}

impl DeclarationLinks for TemplateLinks {
    fn url(&self, path: &str) -> String {
        self.url.replace(Self::PLACEHOLDER, path)
    }

    fn channel_path(&self, path: &str) -> String {
        self.channel_path.replace(Self::PLACEHOLDER, path)
    }
}

/// Everything normalization reads besides the options themselves.
pub struct NormalizeContext<'a> {
    pub roots: &'a RootPrefixes,
    pub links: &'a dyn DeclarationLinks,
    pub packages: &'a dyn PackageRepository,
}

/// Result of normalizing one module set.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub options: Vec<OptionDoc>,
    /// Number of raw options dropped as invisible or internal.
    pub dropped: usize,
}

pub fn normalize(raw: Vec<RawOption>, ctx: &NormalizeContext<'_>) -> Result<Normalized, NormalizeError> {
    let total = raw.len();
    let mut options = raw
        .into_iter()
        .filter(RawOption::is_documented)
        .map(|option| normalize_option(option, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let dropped = total - options.len();

    options.sort_by(|a, b| compare_locs(&a.loc, &b.loc));
    check_locations(&options)?;

    debug!(kept = options.len(), dropped, "normalized options");
    Ok(Normalized { options, dropped })
}

fn normalize_option(raw: RawOption, ctx: &NormalizeContext<'_>) -> Result<OptionDoc, NormalizeError> {
    let name = raw.name();

    let option_type = match &raw.option_type {
        Some(value) => match value.scrub() {
            Value::String(s) => s,
            other => other.to_string(),
        },
        None => {
            return Err(SchemaError::MissingField {
                option: name,
                field: "type",
            }
            .into());
        }
    };

    for (field, value) in [("default", &raw.default), ("example", &raw.example)] {
        if value.as_ref().is_some_and(RawValue::contains_function) {
            debug!(option = %name, field, "replacing function value");
        }
    }

    let default = raw
        .default
        .as_ref()
        .map(|v| convert_literal(v.scrub(), &name))
        .transpose()?;
    let example = raw
        .example
        .as_ref()
        .map(|v| convert_literal(v.scrub(), &name))
        .transpose()?;

    let description = match raw.description {
        None => None,
        Some(RawDescription::DocBook(text)) => Some(format!("<para>{}</para>", text.trim_end())),
        Some(RawDescription::Tagged { kind, text }) if kind == "mdDoc" => {
            Some(markdown::to_docbook(&text).map_err(|source| NormalizeError::Markdown {
                option: name.clone(),
                source,
            })?)
        }
        Some(RawDescription::Tagged { kind, .. }) => {
            return Err(NormalizeError::DescriptionKind { option: name, kind });
        }
    };

    let declarations = raw
        .declarations
        .iter()
        .map(|decl| {
            let path = ctx.roots.strip(decl.path()).to_string();
            let url = match decl {
                RawDeclaration::Linked { url, .. } => url.clone(),
                RawDeclaration::Path(_) => ctx.links.url(&path),
            };
            let channel_path = ctx.links.channel_path(&path);
            Declaration {
                path,
                url,
                channel_path,
            }
        })
        .collect();

    let related_packages = raw
        .related_packages
        .as_ref()
        .map(|specs| {
            specs
                .iter()
                .map(|spec| packages::resolve(spec, ctx.packages))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|source| NormalizeError::Package {
            option: name.clone(),
            source,
        })?;

    Ok(OptionDoc {
        loc: raw.loc,
        option_type,
        default,
        example,
        description,
        declarations,
        related_packages,
    })
}

/// `{"_type": "literalMD", "text": …}` becomes a `literalDocBook` value.
fn convert_literal(value: Value, option: &str) -> Result<Value, NormalizeError> {
    let text = match &value {
        Value::Object(map) if map.get("_type").and_then(Value::as_str) == Some("literalMD") => {
            map.get("text").and_then(Value::as_str).unwrap_or_default()
        }
        _ => return Ok(value),
    };
    let docbook = markdown::to_docbook(text).map_err(|source| NormalizeError::Markdown {
        option: option.to_string(),
        source,
    })?;
    Ok(serde_json::json!({
        "_type": "literalDocBook",
        "text": markdown::unwrap_simpara(&docbook),
    }))
}

fn check_locations(options: &[OptionDoc]) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for option in options {
        if option.loc.is_empty() {
            return Err(SchemaError::EmptyLocation);
        }
        if option.loc.iter().any(String::is_empty) {
            return Err(SchemaError::EmptySegment(option.name()));
        }
        if !seen.insert(&option.loc) {
            return Err(SchemaError::DuplicateLocation(option.name()));
        }
    }
    Ok(())
}

/// Priority class of a path segment: `enable*`, then `package*`, then the rest.
fn segment_class(segment: &str) -> u8 {
    if segment.starts_with("enable") {
        0
    } else if segment.starts_with("package") {
        1
    } else {
        2
    }
}

/// Total order on option paths used for the canonical list.
pub fn compare_locs(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = segment_class(x)
            .cmp(&segment_class(y))
            .then_with(|| x.cmp(y));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Fold `overrides` into `base`, matching options by path.
///
/// New paths are appended. For paths present in both, declarations are
/// unioned in order, the type is replaced unless the override only carries
/// the `_unspecified` placeholder, and every other field is replaced when the
/// override sets it.
pub fn merge_overrides(base: Vec<RawOption>, overrides: Vec<RawOption>) -> Vec<RawOption> {
    let mut merged = base;
    let mut index: BTreeMap<Vec<String>, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, option)| (option.loc.clone(), i))
        .collect();

    for over in overrides {
        let Some(&i) = index.get(&over.loc) else {
            index.insert(over.loc.clone(), merged.len());
            merged.push(over);
            continue;
        };
        let current = &mut merged[i];

        for decl in over.declarations {
            if !current.declarations.contains(&decl) {
                current.declarations.push(decl);
            }
        }
        if let Some(over_type) = over.option_type {
            let placeholder = over_type.as_str() == Some(UNSPECIFIED_TYPE);
            let current_is_placeholder = current
                .option_type
                .as_ref()
                .is_none_or(|t| t.as_str() == Some(UNSPECIFIED_TYPE));
            if !placeholder || current_is_placeholder {
                current.option_type = Some(over_type);
            }
        }
        if over.default.is_some() {
            current.default = over.default;
        }
        if over.example.is_some() {
            current.example = over.example;
        }
        if over.description.is_some() {
            current.description = over.description;
        }
        if over.related_packages.is_some() {
            current.related_packages = over.related_packages;
        }
        if over.visible.is_some() {
            current.visible = over.visible;
        }
        if over.internal.is_some() {
            current.internal = over.internal;
        }
    }
    merged
}
