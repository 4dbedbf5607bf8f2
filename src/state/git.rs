//! Git-backed state store under the `refs/intentc/` namespace.
//!
//! Every record is a JSON blob in the object database, addressed by a ref:
//!
//! ```text
//! refs/intentc/status/<profile>/<target>                 -> {"status": "built", ...}
//! refs/intentc/results/<profile>/<target>/<generation>   -> BuildResult
//! ```
//!
//! Status refs are force-updated; result refs are created once and never
//! overwritten. State travels with the repository and is invisible to
//! branches and the working tree.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{ErrorCode, Oid, Repository};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{sort_results, validate_name, StateStore};
use crate::core::{BuildResult, GenerationId, TargetStatus};
use crate::{Error, Result};

/// The namespace prefix for all intentc refs.
const REFS_PREFIX: &str = "refs/intentc/";

#[derive(Debug, Serialize, Deserialize)]
struct StatusRecord {
    status: TargetStatus,
    updated_at: DateTime<Utc>,
}

/// A [`StateStore`] persisting into the git repository at `repo_path`.
pub struct GitStateStore {
    repo_path: PathBuf,
}

impl GitStateStore {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Get a fresh Repository handle.
    fn repo(&self) -> Result<Repository> {
        Repository::discover(&self.repo_path).map_err(|e| {
            Error::Storage(format!(
                "no git repository at {}: {}",
                self.repo_path.display(),
                e.message()
            ))
        })
    }

    /// The repository if one exists. Reads use this so that a project
    /// without state yet reports no records instead of failing.
    fn existing_repo(&self) -> Result<Option<Repository>> {
        match Repository::discover(&self.repo_path) {
            Ok(repo) => Ok(Some(repo)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!(
                "cannot open git repository at {}: {}",
                self.repo_path.display(),
                e.message()
            ))),
        }
    }

    fn status_ref(profile: &str, target: &str) -> String {
        format!("{}status/{}/{}", REFS_PREFIX, profile, target)
    }

    fn results_prefix(profile: &str, target: &str) -> String {
        format!("{}results/{}/{}/", REFS_PREFIX, profile, target)
    }

    /// Read and decode the JSON blob a ref points at. `None` if the ref is absent.
    fn read_json<T: for<'de> Deserialize<'de>>(repo: &Repository, refname: &str) -> Result<Option<T>> {
        let oid = match repo.find_reference(refname) {
            Ok(reference) => match reference.target() {
                Some(oid) => oid,
                None => return Ok(None),
            },
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::read_blob(repo, oid).map(Some)
    }

    fn read_blob<T: for<'de> Deserialize<'de>>(repo: &Repository, oid: Oid) -> Result<T> {
        let blob = repo.find_blob(oid)?;
        Ok(serde_json::from_slice(blob.content())?)
    }

    fn collect_results(repo: &Repository, glob: &str) -> Result<Vec<BuildResult>> {
        let mut results = Vec::new();
        for reference in repo.references_glob(glob)? {
            let reference = reference?;
            if let Some(oid) = reference.target() {
                results.push(Self::read_blob(repo, oid)?);
            }
        }
        Ok(results)
    }
}

impl StateStore for GitStateStore {
    fn initialize(&self) -> Result<()> {
        debug!(path = %self.repo_path.display(), "GitStateStore::initialize");
        std::fs::create_dir_all(&self.repo_path)?;
        if Repository::discover(&self.repo_path).is_ok() {
            return Ok(());
        }
        debug!("no repository found, initializing one");
        Repository::init(&self.repo_path)?;
        Ok(())
    }

    fn get_target_status(&self, target: &str, profile: &str) -> Result<TargetStatus> {
        validate_name(target)?;
        validate_name(profile)?;
        let Some(repo) = self.existing_repo()? else {
            return Ok(TargetStatus::Pending);
        };
        let record: Option<StatusRecord> = Self::read_json(&repo, &Self::status_ref(profile, target))?;
        Ok(record.map(|r| r.status).unwrap_or_default())
    }

    fn update_target_status(
        &self,
        target: &str,
        profile: &str,
        status: TargetStatus,
    ) -> Result<()> {
        validate_name(target)?;
        validate_name(profile)?;
        let repo = self.repo()?;
        let record = StatusRecord {
            status,
            updated_at: Utc::now(),
        };
        let oid = repo.blob(serde_json::to_string_pretty(&record)?.as_bytes())?;
        let refname = Self::status_ref(profile, target);
        repo.reference(
            &refname,
            oid,
            true,
            &format!("intentc: {} {} -> {}", profile, target, status),
        )?;
        debug!(refname = %refname, status = %status, "status ref updated");
        Ok(())
    }

    fn save_build_result(&self, result: &BuildResult) -> Result<()> {
        validate_name(&result.target)?;
        validate_name(&result.profile)?;
        let repo = self.repo()?;
        let refname = format!(
            "{}{}",
            Self::results_prefix(&result.profile, &result.target),
            result.generation_id
        );

        let oid = repo.blob(serde_json::to_string_pretty(result)?.as_bytes())?;
        let created = repo
            .reference(
                &refname,
                oid,
                false,
                &format!("intentc: record {}", result.generation_id),
            )
            .map(|_| ());
        match created {
            Ok(()) => {
                debug!(refname = %refname, "build result recorded");
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::Exists => Err(Error::ResultExists {
                target: result.target.clone(),
                generation: result.generation_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn list_build_results(&self, target: &str, profile: &str) -> Result<Vec<BuildResult>> {
        validate_name(target)?;
        validate_name(profile)?;
        let Some(repo) = self.existing_repo()? else {
            return Ok(Vec::new());
        };
        let glob = format!("{}*", Self::results_prefix(profile, target));
        let mut results = Self::collect_results(&repo, &glob)?;
        sort_results(&mut results);
        Ok(results)
    }

    fn get_build_result(
        &self,
        target: &str,
        generation: &GenerationId,
    ) -> Result<Option<BuildResult>> {
        validate_name(target)?;
        let Some(repo) = self.existing_repo()? else {
            return Ok(None);
        };
        let glob = format!("{}results/*/{}/{}", REFS_PREFIX, target, generation);
        Ok(Self::collect_results(&repo, &glob)?.into_iter().next())
    }
}
