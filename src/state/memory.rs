//! In-memory state store for tests and embedding.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{sort_results, StateStore};
use crate::core::{BuildResult, GenerationId, TargetStatus};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    /// (profile, target) -> status
    statuses: HashMap<(String, String), TargetStatus>,
    results: Vec<BuildResult>,
}

/// A [`StateStore`] that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    /// Number of stored build results across all targets and profiles.
    pub fn result_count(&self) -> usize {
        self.lock().map(|inner| inner.results.len()).unwrap_or(0)
    }
}

impl StateStore for MemoryStateStore {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn get_target_status(&self, target: &str, profile: &str) -> Result<TargetStatus> {
        let inner = self.lock()?;
        Ok(inner
            .statuses
            .get(&(profile.to_string(), target.to_string()))
            .copied()
            .unwrap_or_default())
    }

    fn update_target_status(
        &self,
        target: &str,
        profile: &str,
        status: TargetStatus,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .statuses
            .insert((profile.to_string(), target.to_string()), status);
        Ok(())
    }

    fn save_build_result(&self, result: &BuildResult) -> Result<()> {
        let mut inner = self.lock()?;
        let exists = inner
            .results
            .iter()
            .any(|r| r.target == result.target && r.generation_id == result.generation_id);
        if exists {
            return Err(Error::ResultExists {
                target: result.target.clone(),
                generation: result.generation_id.to_string(),
            });
        }
        inner.results.push(result.clone());
        Ok(())
    }

    fn list_build_results(&self, target: &str, profile: &str) -> Result<Vec<BuildResult>> {
        let inner = self.lock()?;
        let mut results: Vec<BuildResult> = inner
            .results
            .iter()
            .filter(|r| r.target == target && r.profile == profile)
            .cloned()
            .collect();
        sort_results(&mut results);
        Ok(results)
    }

    fn get_build_result(
        &self,
        target: &str,
        generation: &GenerationId,
    ) -> Result<Option<BuildResult>> {
        let inner = self.lock()?;
        Ok(inner
            .results
            .iter()
            .find(|r| r.target == target && &r.generation_id == generation)
            .cloned())
    }
}
