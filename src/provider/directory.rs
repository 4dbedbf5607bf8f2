//! Filesystem target provider.
//!
//! Reads one manifest per target from `<intent_dir>/<name>/intent.toml`:
//!
//! ```toml
//! name = "auth"                  # optional, defaults to the directory name
//! depends_on = ["models"]
//! content = """
//! Add login and logout endpoints.
//! """
//!
//! [[validation]]
//! name = "endpoints exist"
//! type = "file_check"
//! description = "src/auth.rs defines login()"
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use tracing::debug;

use super::{TargetDefinition, TargetProvider};
use crate::{Error, Result};

/// Manifest file name inside each target directory.
pub const MANIFEST_FILE: &str = "intent.toml";

#[derive(Debug, Deserialize)]
struct Manifest {
    name: Option<String>,
    #[serde(flatten)]
    definition: TargetDefinition,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    source: String,
    name: String,
    definition: TargetDefinition,
}

/// Parsed manifests keyed by path.
///
/// An entry is reused only while the file content is byte-for-byte what was
/// parsed last time.
#[derive(Debug, Default)]
pub struct TargetCache {
    entries: HashMap<PathBuf, CacheEntry>,
    hits: usize,
    misses: usize,
}

impl TargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the parsed manifest for `path`, reparsing if `source` changed.
    fn get_or_parse(
        &mut self,
        path: &Path,
        source: String,
        default_name: &str,
    ) -> Result<(String, TargetDefinition)> {
        if let Some(entry) = self.entries.get(path) {
            if entry.source == source {
                self.hits += 1;
                return Ok((entry.name.clone(), entry.definition.clone()));
            }
        }

        self.misses += 1;
        let manifest: Manifest = toml::from_str(&source).map_err(|e| {
            Error::Config(format!("invalid target manifest {}: {}", path.display(), e))
        })?;
        let name = manifest.name.unwrap_or_else(|| default_name.to_string());
        self.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                source,
                name: name.clone(),
                definition: manifest.definition.clone(),
            },
        );
        Ok((name, manifest.definition))
    }

    /// Drop entries for manifests that no longer exist.
    fn retain_paths(&mut self, live: &HashSet<PathBuf>) {
        self.entries.retain(|path, _| live.contains(path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

/// A [`TargetProvider`] reading manifests from a directory tree.
pub struct DirectoryProvider {
    root: PathBuf,
    cache: Mutex<TargetCache>,
}

impl DirectoryProvider {
    pub fn new(root: &Path) -> Self {
        Self::with_cache(root, TargetCache::new())
    }

    /// Use a caller-owned cache, e.g. one carried over from a previous run.
    pub fn with_cache(root: &Path, cache: TargetCache) -> Self {
        Self {
            root: root.to_path_buf(),
            cache: Mutex::new(cache),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hand the cache back, e.g. to reuse it for the next provider.
    pub fn into_cache(self) -> TargetCache {
        self.cache.into_inner().unwrap_or_default()
    }

    /// Run `f` against the cache, for inspection.
    pub fn with_cache_ref<R>(&self, f: impl FnOnce(&TargetCache) -> R) -> Option<R> {
        self.cache.lock().ok().map(|cache| f(&cache))
    }

    fn manifest_paths(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "intent directory {} does not exist",
                self.root.display()
            )));
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let manifest = entry.path().join(MANIFEST_FILE);
            if manifest.is_file() {
                let dir_name = entry.file_name().to_string_lossy().into_owned();
                paths.push((dir_name, manifest));
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl TargetProvider for DirectoryProvider {
    fn load(&self) -> Result<BTreeMap<String, TargetDefinition>> {
        let paths = self.manifest_paths()?;
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::Config("target cache lock poisoned".to_string()))?;

        let mut targets = BTreeMap::new();
        let mut live = HashSet::new();
        for (dir_name, path) in paths {
            let source = fs::read_to_string(&path)?;
            let (name, definition) = cache.get_or_parse(&path, source, &dir_name)?;
            if targets.insert(name.clone(), definition).is_some() {
                return Err(Error::DuplicateTarget(name));
            }
            live.insert(path);
        }
        cache.retain_paths(&live);

        debug!(
            root = %self.root.display(),
            targets = targets.len(),
            cache_hits = cache.hits(),
            cache_misses = cache.misses(),
            "targets loaded"
        );
        Ok(targets)
    }
}
