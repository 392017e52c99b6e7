//! Related-package resolution.
//!
//! Options may point at packages that are useful alongside them. The raw
//! option tree names those packages in one of three shapes:
//!
//! ```json
//! "relatedPackages": [
//!   "hello",
//!   ["python3Packages", "requests"],
//!   { "name": "vim", "path": ["vim_configurable"], "comment": "with GUI support" }
//! ]
//! ```
//!
//! Each shape is a [`PackageSpec`] variant. Resolution first brings every
//! variant to the same record form, then looks the attribute path up in a
//! [`PackageRepository`] unless the record already carries the package. The
//! result is an immutable [`PackageRef`] snapshot.

use crate::types::PackageRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("cannot resolve related package `{}`", .path.join("."))]
pub struct PackageResolutionError {
    pub path: Vec<String>,
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("package repository is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Metadata the repository returns for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMeta {
    pub name: String,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
}

fn default_available() -> bool {
    true
}

/// A related-package specification as written in the option tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PackageSpec {
    /// `"hello"`
    Name(String),
    /// `["python3Packages", "requests"]`
    Path(Vec<String>),
    /// `{ "name": …, "path": […], "package": {…}, "comment": … }`
    Record(PackageRecord),
}

/// The canonical form every [`PackageSpec`] is brought to before lookup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PackageRecord {
    pub name: Option<String>,
    pub path: Option<Vec<String>>,
    pub package: Option<PackageMeta>,
    pub comment: Option<String>,
}

impl PackageSpec {
    pub fn into_record(self) -> PackageRecord {
        match self {
            PackageSpec::Name(name) => PackageRecord {
                name: Some(name),
                ..Default::default()
            },
            PackageSpec::Path(path) => PackageRecord {
                path: Some(path),
                ..Default::default()
            },
            PackageSpec::Record(record) => record,
        }
    }
}

/// Lookup service for package metadata.
///
/// Shared read-only between module sets that normalize in parallel.
pub trait PackageRepository: Sync {
    fn lookup(&self, path: &[String]) -> Option<PackageMeta>;
}

/// Repository backed by a JSON object keyed by dotted attribute path.
///
/// ```json
/// { "hello": { "name": "hello-2.10", "description": "A friendly program" } }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticRepository {
    packages: BTreeMap<String, PackageMeta>,
}

impl StaticRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, RepositoryError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn insert(&mut self, attr_path: &str, meta: PackageMeta) {
        self.packages.insert(attr_path.to_string(), meta);
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl PackageRepository for StaticRepository {
    fn lookup(&self, path: &[String]) -> Option<PackageMeta> {
        self.packages.get(&path.join(".")).cloned()
    }
}

/// Resolve one specification into a [`PackageRef`].
///
/// `path` defaults to `[name]` and `name` to `path` joined by `.`. The
/// repository is consulted only when the spec does not carry the package.
pub fn resolve<R: PackageRepository + ?Sized>(
    spec: &PackageSpec,
    repo: &R,
) -> Result<PackageRef, PackageResolutionError> {
    let record = spec.clone().into_record();
    let path = match (&record.path, &record.name) {
        (Some(path), _) => path.clone(),
        (None, Some(name)) => vec![name.clone()],
        (None, None) => Vec::new(),
    };
    let attr_name = record.name.unwrap_or_else(|| path.join("."));

    let package = match record.package {
        Some(package) => package,
        None => {
            if path.is_empty() {
                return Err(PackageResolutionError { path });
            }
            repo.lookup(&path)
                .ok_or_else(|| PackageResolutionError { path: path.clone() })?
        }
    };
    debug!(attr = %attr_name, package = %package.name, "resolved related package");

    Ok(PackageRef {
        attr_name,
        package_name: package.name,
        available: package.available,
        description: package.description,
        long_description: package.long_description,
        comment: record.comment,
    })
}
