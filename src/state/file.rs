//! Flat-file state store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<profile>/status.json                     {"target": "built", ...}
//! <root>/<profile>/results/<target>/<generation>.json
//! ```

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{sort_results, validate_name, StateStore};
use crate::core::{BuildResult, GenerationId, TargetStatus};
use crate::{Error, Result};

/// A [`StateStore`] backed by JSON files in a directory.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn status_path(&self, profile: &str) -> PathBuf {
        self.root.join(profile).join("status.json")
    }

    fn results_dir(&self, profile: &str, target: &str) -> PathBuf {
        self.root.join(profile).join("results").join(target)
    }

    /// Writes need an initialized store; reads treat a missing root as empty.
    fn ensure_root(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::Storage(format!(
                "state directory {} is missing; run initialize first",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn read_statuses(&self, profile: &str) -> Result<BTreeMap<String, TargetStatus>> {
        let path = self.status_path(profile);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temporary file and rename, so readers never see a torn file.
    fn write_statuses(&self, profile: &str, statuses: &BTreeMap<String, TargetStatus>) -> Result<()> {
        let path = self.status_path(profile);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(statuses)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_result(path: &Path) -> Result<BuildResult> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn profiles(&self) -> Result<Vec<String>> {
        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    profiles.push(name.to_string());
                }
            }
        }
        Ok(profiles)
    }
}

impl StateStore for FileStateStore {
    fn initialize(&self) -> Result<()> {
        debug!(root = %self.root.display(), "FileStateStore::initialize");
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn get_target_status(&self, target: &str, profile: &str) -> Result<TargetStatus> {
        validate_name(target)?;
        validate_name(profile)?;
        if !self.root.is_dir() {
            return Ok(TargetStatus::Pending);
        }
        Ok(self
            .read_statuses(profile)?
            .get(target)
            .copied()
            .unwrap_or_default())
    }

    fn update_target_status(
        &self,
        target: &str,
        profile: &str,
        status: TargetStatus,
    ) -> Result<()> {
        validate_name(target)?;
        validate_name(profile)?;
        self.ensure_root()?;
        let mut statuses = self.read_statuses(profile)?;
        statuses.insert(target.to_string(), status);
        self.write_statuses(profile, &statuses)?;
        debug!(target_name = target, profile, status = %status, "status written");
        Ok(())
    }

    fn save_build_result(&self, result: &BuildResult) -> Result<()> {
        validate_name(&result.target)?;
        validate_name(&result.profile)?;
        self.ensure_root()?;
        let dir = self.results_dir(&result.profile, &result.target);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", result.generation_id));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::ResultExists {
                    target: result.target.clone(),
                    generation: result.generation_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(serde_json::to_string_pretty(result)?.as_bytes())?;
        file.sync_all()?;
        debug!(path = %path.display(), "build result saved");
        Ok(())
    }

    fn list_build_results(&self, target: &str, profile: &str) -> Result<Vec<BuildResult>> {
        validate_name(target)?;
        validate_name(profile)?;
        let dir = self.results_dir(profile, target);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                results.push(Self::read_result(&path)?);
            }
        }
        sort_results(&mut results);
        Ok(results)
    }

    fn get_build_result(
        &self,
        target: &str,
        generation: &GenerationId,
    ) -> Result<Option<BuildResult>> {
        validate_name(target)?;
        if !self.root.is_dir() {
            return Ok(None);
        }
        for profile in self.profiles()? {
            let path = self
                .results_dir(&profile, target)
                .join(format!("{}.json", generation));
            if path.is_file() {
                return Ok(Some(Self::read_result(&path)?));
            }
        }
        Ok(None)
    }
}
