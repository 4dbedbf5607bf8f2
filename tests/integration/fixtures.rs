//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Temporary projects with a git repository and an intent directory
//! - A recording mock agent
//! - Wiring an orchestrator over the on-disk provider and stores

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use git2::Repository;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use intentc::agent::{Agent, AgentContext};
use intentc::config::{Config, StateBackend};
use intentc::provider::{DirectoryProvider, MANIFEST_FILE};
use intentc::state::{open_store, StateStore};
use intentc::{Error, Orchestrator, Result};

/// A scratch project: git repository, config, and intent directory.
pub struct TestProject {
    /// Keeps the directory alive for the lifetime of the test.
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
}

impl TestProject {
    /// Create a project backed by the git state store.
    pub fn new() -> Self {
        Self::with_backend(StateBackend::Git)
    }

    pub fn with_backend(backend: StateBackend) -> Self {
        let project = Self::without_repository(backend);
        Repository::init(&project.root).expect("Failed to init git repository");
        project
    }

    /// A project that is not inside a git repository and has no state yet.
    pub fn without_repository(backend: StateBackend) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();

        let config = Config {
            state_backend: backend,
            ..Config::default()
        };
        config.save(&root).expect("Failed to write config");
        std::fs::create_dir_all(config.intent_dir(&root)).expect("Failed to create intent dir");

        Self {
            temp_dir,
            root,
            config,
        }
    }

    /// Write `<intent_dir>/<name>/intent.toml`.
    pub fn add_target(&self, name: &str, depends_on: &[&str], content: &str) {
        let dir = self.config.intent_dir(&self.root).join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create target dir");

        let deps: Vec<String> = depends_on.iter().map(|d| format!("{:?}", d)).collect();
        let manifest = format!(
            "depends_on = [{}]\ncontent = {:?}\n",
            deps.join(", "),
            content
        );
        std::fs::write(dir.join(MANIFEST_FILE), manifest).expect("Failed to write manifest");
    }

    /// A fresh, initialized store, as a new process would open it.
    pub fn store(&self) -> Arc<dyn StateStore> {
        let store = open_store(&self.config, &self.root);
        store.initialize().expect("Failed to initialize store");
        store
    }

    /// A fresh orchestrator over the on-disk provider and store.
    pub fn orchestrator(&self, agent: Arc<dyn Agent>) -> Orchestrator {
        let provider = Arc::new(DirectoryProvider::new(&self.config.intent_dir(&self.root)));
        Orchestrator::new(&self.root, self.config.clone(), provider, self.store(), agent)
    }

    /// An orchestrator over a store that has never been initialized, as
    /// read-only commands and dry runs open it.
    pub fn uninitialized_orchestrator(&self, agent: Arc<dyn Agent>) -> Orchestrator {
        let provider = Arc::new(DirectoryProvider::new(&self.config.intent_dir(&self.root)));
        let store = open_store(&self.config, &self.root);
        Orchestrator::new(&self.root, self.config.clone(), provider, store, agent)
    }

    pub fn output_dir(&self, profile: &str) -> PathBuf {
        self.config
            .output_dir(&self.root, profile)
            .expect("valid profile")
    }
}

/// One recorded agent invocation.
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub target: String,
    pub profile: String,
    pub dependencies: Vec<String>,
    pub output_dir: PathBuf,
    pub generation: String,
}

/// Mock agent that writes `<target>.txt` into the output directory.
///
/// Targets listed in `fail` return an error; targets in `hang` block until
/// cancelled.
#[derive(Default)]
pub struct RecordingAgent {
    calls: Mutex<Vec<AgentCall>>,
    fail: HashSet<String>,
    hang: HashSet<String>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, target: &str) -> Self {
        self.fail.insert(target.to_string());
        self
    }

    pub fn hanging_on(mut self, target: &str) -> Self {
        self.hang.insert(target.to_string());
        self
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn called_targets(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.target).collect()
    }

    pub fn calls_for(&self, target: &str) -> usize {
        self.calls().iter().filter(|c| c.target == target).count()
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    async fn build(&self, ctx: &AgentContext, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
        self.calls.lock().expect("calls lock").push(AgentCall {
            target: ctx.target.clone(),
            profile: ctx.profile.clone(),
            dependencies: ctx.dependencies.clone(),
            output_dir: ctx.output_dir.clone(),
            generation: ctx.generation_id.to_string(),
        });

        if self.hang.contains(&ctx.target) {
            cancel.cancelled().await;
            return Err(Error::Cancelled);
        }
        if self.fail.contains(&ctx.target) {
            return Err(Error::AgentFailed(format!("could not build {}", ctx.target)));
        }

        let file = ctx.output_dir.join(format!("{}.txt", ctx.target));
        tokio::fs::write(&file, &ctx.intent_content).await?;
        Ok(vec![file])
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Cancel `token` after `delay`.
pub fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

/// True if `path` is inside `dir`.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}
