//! Fragment cache for incremental builds.
//!
//! Rendering a fragment is cheap next to evaluating the module sets, but a
//! large option list still renders to megabytes of DocBook. This module lets
//! the fragment stage skip rendering when neither the normalized options nor
//! the fragment parameters changed since the last build.
//!
//! ## Cache keys
//!
//! Entries are keyed by fragment id and store an **input hash**: SHA-256 of
//! the canonical JSON of the normalized option list, the fragment id, the
//! anchor prefix, the channel name and the document type. Any change to one
//! of them changes the hash and the fragment is rendered again.
//!
//! A cache hit requires:
//! 1. An entry for the fragment id with a matching input hash
//! 2. The previously written fragment file still exists in the work directory
//!
//! ## Storage
//!
//! The manifest is a JSON file at `<work_dir>/.fragment-cache.json`, next to
//! the rendered `<id>.xml` files.
//!
//! A missing, corrupt or outdated manifest is never an error: it loads as an
//! empty cache and every fragment is rendered. Pass `--no-cache` to `build`
//! to force that.

use crate::fragment::FragmentParams;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the cache manifest file within the work directory.
const MANIFEST_FILENAME: &str = ".fragment-cache.json";

/// Version of the cache manifest format. Bump this to invalidate all
/// existing caches when the format or key computation changes.
const MANIFEST_VERSION: u32 = 1;

/// A single cached fragment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub input_hash: String,
    /// Fragment file, relative to the work directory.
    pub file: String,
}

/// On-disk manifest mapping fragment ids to their cache entries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl CacheManifest {
    /// Create an empty manifest (used for `--no-cache` or first build).
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Load from the work directory. Returns an empty manifest if the
    /// file doesn't exist or can't be parsed (version mismatch, corruption).
    pub fn load(work_dir: &Path) -> Self {
        let path = manifest_path(work_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring unreadable fragment cache");
                return Self::empty();
            }
        };
        if manifest.version != MANIFEST_VERSION {
            warn!(path = %path.display(), version = manifest.version, "ignoring outdated fragment cache");
            return Self::empty();
        }
        manifest
    }

    /// Save to the work directory.
    pub fn save(&self, work_dir: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(manifest_path(work_dir), json)
    }

    /// Look up a cached fragment.
    ///
    /// Returns the stored file name if the entry for `id` has the same input
    /// hash **and** the file is still on disk.
    pub fn find_cached(&self, id: &str, input_hash: &str, work_dir: &Path) -> Option<&str> {
        let entry = self.entries.get(id)?;
        if entry.input_hash == input_hash && work_dir.join(&entry.file).is_file() {
            Some(&entry.file)
        } else {
            None
        }
    }

    /// Record the fragment rendered for `id`, replacing any older entry.
    pub fn insert(&mut self, id: String, input_hash: String, file: String) {
        self.entries.insert(id, CacheEntry { input_hash, file });
    }

    /// Drop entries for fragments that no module set produces anymore.
    pub fn retain_ids<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::BTreeSet<&str> = ids.into_iter().collect();
        self.entries.retain(|id, _| keep.contains(id.as_str()));
    }
}

/// SHA-256 over everything a rendered fragment depends on.
pub fn fragment_input_hash(canonical_json: &str, params: &FragmentParams<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_json.as_bytes());
    for part in [
        params.id,
        params.id_prefix(),
        params.channel_name,
        params.document_type.to_string().as_str(),
    ] {
        hasher.update(b"\0");
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Summary of cache performance for a build run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} rendered ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} rendered", self.misses)
        }
    }
}

/// Resolve the cache manifest path for a work directory.
pub fn manifest_path(work_dir: &Path) -> PathBuf {
    work_dir.join(MANIFEST_FILENAME)
}
