//! Normalized option records shared by every stage after normalization.
//!
//! These types are the single source of truth the exporter, the fragment
//! renderer and the fragment cache all consume. Field names serialize in
//! camelCase to match the canonical JSON export.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A normalized record set violates one of its structural invariants.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("option with an empty path")]
    EmptyLocation,
    #[error("option `{0}` has an empty path segment")]
    EmptySegment(String),
    #[error("option `{0}` is declared more than once")]
    DuplicateLocation(String),
    #[error("option `{option}` is missing required field `{field}`")]
    MissingField { option: String, field: &'static str },
    #[error("options {first:?} and {second:?} both export as `{key}`")]
    DuplicateKey {
        key: String,
        first: Vec<String>,
        second: Vec<String>,
    },
}

/// One documented configuration path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDoc {
    /// Path segments, e.g. `["services", "foo", "enable"]`. Unique per list.
    pub loc: Vec<String>,
    /// Human-readable description of the accepted value shape.
    #[serde(rename = "type")]
    pub option_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    /// DocBook markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub declarations: Vec<Declaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_packages: Option<Vec<PackageRef>>,
}

impl OptionDoc {
    /// Dotted option path (`services.foo.enable`).
    pub fn name(&self) -> String {
        self.loc.join(".")
    }
}

/// Where an option was declared, with local filesystem prefixes stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub path: String,
    pub url: String,
    pub channel_path: String,
}

/// Snapshot of a related package, resolved once during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRef {
    /// Display key (`hello`, `python3Packages.requests`).
    pub attr_name: String,
    /// Resolved package name (`hello-2.10`).
    pub package_name: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One output file produced by a renderer, relative to its output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: std::path::PathBuf,
    pub contents: String,
}

impl RenderedFile {
    pub fn new(path: impl Into<std::path::PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}
