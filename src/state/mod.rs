//! Build state persistence.
//!
//! The [`StateStore`] trait is the only persistence boundary the orchestrator
//! depends on. Every record is scoped by build profile, so profiles never see
//! each other's status or results.

mod file;
mod git;
mod memory;

pub use file::FileStateStore;
pub use git::GitStateStore;
pub use memory::MemoryStateStore;

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, StateBackend};
use crate::core::{BuildResult, GenerationId, TargetStatus};
use crate::{Error, Result};

/// Durable, profile-scoped record of what has been built.
///
/// Implementations must treat build results as append-only: saving a result
/// whose (target, generation id) is already stored is an error, never an
/// overwrite.
pub trait StateStore: Send + Sync {
    /// Prepare the backing storage. Safe to call repeatedly.
    fn initialize(&self) -> Result<()>;

    /// Current status, or `Pending` when nothing was ever recorded.
    fn get_target_status(&self, target: &str, profile: &str) -> Result<TargetStatus>;

    /// Overwrite the current status.
    fn update_target_status(&self, target: &str, profile: &str, status: TargetStatus)
        -> Result<()>;

    /// Append an immutable build result.
    fn save_build_result(&self, result: &BuildResult) -> Result<()>;

    /// Every stored result for `target` under `profile`, oldest first.
    fn list_build_results(&self, target: &str, profile: &str) -> Result<Vec<BuildResult>>;

    /// Look up one attempt by generation id, whatever its profile.
    fn get_build_result(
        &self,
        target: &str,
        generation: &GenerationId,
    ) -> Result<Option<BuildResult>>;

    /// The result with the greatest timestamp for `target` under `profile`.
    fn get_latest_build_result(&self, target: &str, profile: &str) -> Result<Option<BuildResult>> {
        Ok(self
            .list_build_results(target, profile)?
            .into_iter()
            .max_by_key(|r| r.timestamp))
    }
}

/// Target and profile names are used as path and ref segments.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with('.')
        || name.ends_with(".lock")
        || name.contains("..")
        || name.chars().any(|c| {
            c.is_whitespace()
                || c.is_control()
                || matches!(c, '/' | '\\' | ':' | '~' | '^' | '?' | '*' | '[' | '@' | '{')
        });
    if invalid {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Sort results oldest first, breaking timestamp ties by generation id.
pub(crate) fn sort_results(results: &mut [BuildResult]) {
    results.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.generation_id.0.cmp(&b.generation_id.0))
    });
}

/// Open the store selected by `config` for the project at `project_root`.
pub fn open_store(config: &Config, project_root: &Path) -> Arc<dyn StateStore> {
    match config.state_backend {
        StateBackend::Git => Arc::new(GitStateStore::new(project_root)),
        StateBackend::File => {
            let root = Config::state_dir(project_root).join("state");
            Arc::new(FileStateStore::new(&root))
        }
    }
}
