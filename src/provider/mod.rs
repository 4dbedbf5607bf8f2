//! Target definitions.
//!
//! A [`TargetProvider`] hands the orchestrator a fresh name -> definition map on
//! every run. Any caching stays inside the provider.

mod directory;

pub use directory::{DirectoryProvider, TargetCache, MANIFEST_FILE};

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::ValidationDescriptor;
use crate::{Error, Result};

/// Everything a provider knows about one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDefinition {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, rename = "validation")]
    pub validations: Vec<ValidationDescriptor>,
}

impl TargetDefinition {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Self::default()
        }
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_validation(mut self, validation: ValidationDescriptor) -> Self {
        self.validations.push(validation);
        self
    }
}

/// Source of target definitions, queried once per orchestrator run.
pub trait TargetProvider: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, TargetDefinition>>;
}

/// A provider backed by a map held in memory.
#[derive(Default)]
pub struct InMemoryProvider {
    targets: Mutex<BTreeMap<String, TargetDefinition>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, TargetDefinition>>> {
        self.targets
            .lock()
            .map_err(|_| Error::Config("target provider lock poisoned".to_string()))
    }

    /// Add or replace a target definition.
    pub fn insert(&self, name: &str, definition: TargetDefinition) -> Result<()> {
        self.lock()?.insert(name.to_string(), definition);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Option<TargetDefinition>> {
        Ok(self.lock()?.remove(name))
    }
}

impl FromIterator<(String, TargetDefinition)> for InMemoryProvider {
    fn from_iter<I: IntoIterator<Item = (String, TargetDefinition)>>(iter: I) -> Self {
        Self {
            targets: Mutex::new(iter.into_iter().collect()),
        }
    }
}

impl TargetProvider for InMemoryProvider {
    fn load(&self) -> Result<BTreeMap<String, TargetDefinition>> {
        Ok(self.lock()?.clone())
    }
}
