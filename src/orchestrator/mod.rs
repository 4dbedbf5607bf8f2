//! Build orchestration.
//!
//! Turns a [`BuildRequest`] into a dependency-first plan and drives it,
//! one target at a time, through the agent and the state store.

mod plan;

pub use plan::{
    BuildPlan, BuildReport, BuildRequest, CleanReport, PlannedAction, PlannedTarget,
    TargetOutcome, TargetState,
};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentContext};
use crate::config::{validate_profile, Config};
use crate::core::{BuildResult, DependencyGraph, GenerationId, Intent, Target, TargetStatus};
use crate::provider::TargetProvider;
use crate::state::{validate_name, StateStore};
use crate::{Error, Result};

/// Coordinates target loading, planning and execution for one project.
pub struct Orchestrator {
    project_root: PathBuf,
    config: Config,
    provider: Arc<dyn TargetProvider>,
    store: Arc<dyn StateStore>,
    agent: Arc<dyn Agent>,
    agent_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        project_root: &Path,
        config: Config,
        provider: Arc<dyn TargetProvider>,
        store: Arc<dyn StateStore>,
        agent: Arc<dyn Agent>,
    ) -> Self {
        let agent_timeout = config.agent.total_timeout();
        Self {
            project_root: project_root.to_path_buf(),
            config,
            provider,
            store,
            agent,
            agent_timeout,
        }
    }

    /// Upper bound for each agent call; `None` waits indefinitely.
    pub fn with_agent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// The requested profile, or the configured default.
    pub fn resolve_profile(&self, requested: Option<&str>) -> Result<String> {
        let profile = requested.unwrap_or(&self.config.default_profile);
        validate_profile(profile)?;
        Ok(profile.to_string())
    }

    /// Fetch definitions from the provider and resolve every declared dependency.
    pub fn load_targets(&self) -> Result<BTreeMap<String, Target>> {
        let definitions = self.provider.load()?;
        let mut targets = BTreeMap::new();

        for (name, definition) in &definitions {
            validate_name(name)?;
            let mut dependencies: Vec<String> = Vec::new();
            for dependency in &definition.depends_on {
                if !definitions.contains_key(dependency) {
                    return Err(Error::UnresolvedDependency {
                        target: name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                if !dependencies.contains(dependency) {
                    dependencies.push(dependency.clone());
                }
            }

            let intent = Intent {
                content: definition.content.clone(),
                depends_on: definition.depends_on.clone(),
            };
            let mut target =
                Target::new(name, intent).with_validations(definition.validations.clone());
            target.dependencies = dependencies;
            targets.insert(name.clone(), target);
        }

        debug!(count = targets.len(), "targets loaded");
        Ok(targets)
    }

    fn assemble_graph(targets: &BTreeMap<String, Target>) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for target in targets.values() {
            graph.add_node(&target.name);
            for dependency in &target.dependencies {
                graph.add_edge(&target.name, dependency);
            }
        }
        graph
    }

    fn validated_graph(targets: &BTreeMap<String, Target>) -> Result<DependencyGraph> {
        let graph = Self::assemble_graph(targets);
        if let Some(path) = graph.detect_cycles() {
            error!(cycle = %path.join(" -> "), "dependency cycle");
            return Err(Error::CycleDetected { path });
        }
        Ok(graph)
    }

    /// The full, cycle-checked dependency graph.
    pub fn graph(&self) -> Result<DependencyGraph> {
        Self::validated_graph(&self.load_targets()?)
    }

    /// `name` plus every target that transitively depends on it.
    pub fn affected(&self, name: &str) -> Result<Vec<String>> {
        let graph = Self::assemble_graph(&self.load_targets()?);
        if !graph.contains(name) {
            return Err(Error::TargetNotFound(name.to_string()));
        }
        Ok(graph
            .find_affected_nodes(name)
            .iter()
            .map(|n| n.name().to_string())
            .collect())
    }

    fn status_of(&self, target: &str, profile: &str) -> Result<TargetStatus> {
        self.store
            .get_target_status(target, profile)
            .map_err(|e| store_error(target, e))
    }

    fn set_status(&self, target: &str, profile: &str, status: TargetStatus) -> Result<()> {
        self.store
            .update_target_status(target, profile, status)
            .map_err(|e| store_error(target, e))
    }

    fn prepare(&self, request: &BuildRequest) -> Result<(BTreeMap<String, Target>, BuildPlan)> {
        let profile = self.resolve_profile(request.profile.as_deref())?;
        let output_dir = self.config.output_dir(&self.project_root, &profile)?;
        let targets = self.load_targets()?;
        let graph = Self::validated_graph(&targets)?;

        let order: Vec<String> = match &request.target {
            Some(name) => graph
                .build_order_for(name)?
                .iter()
                .map(|n| n.name().to_string())
                .collect(),
            None => graph
                .topological_sort()?
                .iter()
                .map(|n| n.name().to_string())
                .collect(),
        };

        let mut planned = Vec::with_capacity(order.len());
        for name in order {
            let status = self.status_of(&name, &profile)?;
            let action = if status.is_built() && !request.force {
                // Full scope only covers targets that still need building.
                if request.target.is_none() {
                    continue;
                }
                PlannedAction::Skip
            } else {
                PlannedAction::Build
            };
            planned.push(PlannedTarget {
                name,
                status,
                action,
            });
        }

        let plan = BuildPlan {
            profile,
            output_dir,
            targets: planned,
        };
        Ok((targets, plan))
    }

    /// Compute the plan for `request` without building or changing state.
    pub fn plan(&self, request: &BuildRequest) -> Result<BuildPlan> {
        self.prepare(request).map(|(_, plan)| plan)
    }

    /// Build everything `request` selects, stopping at the first failure.
    ///
    /// On cancellation the running target keeps status `building` and
    /// `Error::Cancelled` is returned.
    pub async fn build(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let (targets, plan) = self.prepare(request)?;
        info!(
            profile = %plan.profile,
            scope = request.target.as_deref().unwrap_or("all"),
            planned = plan.targets.len(),
            force = request.force,
            dry_run = request.dry_run,
            "build plan ready"
        );

        if request.dry_run {
            return Ok(BuildReport {
                plan,
                dry_run: true,
                outcomes: Vec::new(),
            });
        }

        tokio::fs::create_dir_all(&plan.output_dir).await?;

        let mut outcomes = Vec::with_capacity(plan.targets.len());
        for planned in &plan.targets {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let target = targets
                .get(&planned.name)
                .ok_or_else(|| Error::TargetNotFound(planned.name.clone()))?;
            let outcome = self
                .build_target(target, &plan, request.force, cancel)
                .await?;
            outcomes.push(outcome);
        }

        Ok(BuildReport {
            plan,
            dry_run: false,
            outcomes,
        })
    }

    async fn build_target(
        &self,
        target: &Target,
        plan: &BuildPlan,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<TargetOutcome> {
        let name = target.name.as_str();
        let profile = plan.profile.as_str();

        if !force && self.status_of(name, profile)?.is_built() {
            info!(target_name = name, profile, "already built, skipping");
            return Ok(TargetOutcome::Skipped {
                target: name.to_string(),
            });
        }

        for dependency in &target.dependencies {
            if !self.status_of(dependency, profile)?.is_built() {
                return Err(Error::DependencyNotBuilt {
                    target: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        self.set_status(name, profile, TargetStatus::Building)?;
        let generation_id = GenerationId::new();
        info!(
            target_name = name,
            profile,
            generation = %generation_id.short(),
            agent = self.agent.name(),
            "building"
        );

        let ctx = AgentContext {
            target: name.to_string(),
            dependencies: target.dependencies.clone(),
            intent_content: target.intent.content.clone(),
            validations: target.validations.clone(),
            project_root: self.project_root.clone(),
            generation_id,
            profile: profile.to_string(),
            output_dir: plan.output_dir.clone(),
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.call_agent(&ctx, cancel) => result,
        };

        match outcome {
            Ok(files) => {
                let result = BuildResult::succeeded(
                    name,
                    generation_id,
                    profile,
                    plan.output_dir.clone(),
                    files,
                );
                self.store
                    .save_build_result(&result)
                    .map_err(|e| store_error(name, e))?;
                self.set_status(name, profile, TargetStatus::Built)?;
                info!(
                    target_name = name,
                    profile,
                    files = result.files.len(),
                    "built"
                );
                Ok(TargetOutcome::Built(result))
            }
            Err(e) if e.is_cancelled() => {
                warn!(target_name = name, profile, "cancelled, status left as building");
                Err(Error::Cancelled)
            }
            Err(e) => {
                error!(target_name = name, profile, error = %e, "build failed");
                let message = e.to_string();
                let result = BuildResult::failed(
                    name,
                    generation_id,
                    profile,
                    plan.output_dir.clone(),
                    &message,
                );
                self.store
                    .save_build_result(&result)
                    .map_err(|err| store_error(name, err))?;
                self.set_status(name, profile, TargetStatus::Failed)?;
                Err(Error::TargetFailed {
                    target: name.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn call_agent(
        &self,
        ctx: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let call = self.agent.build(ctx, cancel);
        match self.agent_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(Error::Timeout(limit))),
            None => call.await,
        }
    }

    /// Status and latest result of every loaded target under a profile.
    pub fn status(&self, profile: Option<&str>) -> Result<Vec<TargetState>> {
        let profile = self.resolve_profile(profile)?;
        let targets = self.load_targets()?;
        let mut states = Vec::with_capacity(targets.len());
        for target in targets.values() {
            let status = self.status_of(&target.name, &profile)?;
            let latest = self
                .store
                .get_latest_build_result(&target.name, &profile)
                .map_err(|e| store_error(&target.name, e))?;
            states.push(TargetState {
                name: target.name.clone(),
                dependencies: target.dependencies.clone(),
                status,
                latest,
            });
        }
        Ok(states)
    }

    /// Every recorded attempt for `target` under a profile, oldest first.
    pub fn history(&self, target: &str, profile: Option<&str>) -> Result<Vec<BuildResult>> {
        let profile = self.resolve_profile(profile)?;
        self.store
            .list_build_results(target, &profile)
            .map_err(|e| store_error(target, e))
    }

    /// Remove generated output and reset status to pending.
    ///
    /// With a target, only files from its latest successful result that
    /// resolve inside the profile output directory are removed. Without one,
    /// the whole profile output directory goes and every loaded target is
    /// reset.
    ///
    /// Build history is kept, so a cleaned target is `pending` while its
    /// latest recorded result may still be a success. The next build of it
    /// runs the agent again and records a new result.
    pub fn clean(&self, target: Option<&str>, profile: Option<&str>) -> Result<CleanReport> {
        let profile = self.resolve_profile(profile)?;
        let output_dir = self.config.output_dir(&self.project_root, &profile)?;
        let targets = self.load_targets()?;
        let mut report = CleanReport {
            profile: profile.clone(),
            ..CleanReport::default()
        };

        let names: Vec<&str> = match target {
            Some(name) => {
                if !targets.contains_key(name) {
                    return Err(Error::TargetNotFound(name.to_string()));
                }
                let latest_success = self
                    .store
                    .list_build_results(name, &profile)
                    .map_err(|e| store_error(name, e))?
                    .into_iter()
                    .rev()
                    .find(|r| r.success);
                if let (Some(result), Ok(root)) = (latest_success, output_dir.canonicalize()) {
                    for file in &result.files {
                        // Never touch anything outside the profile's output.
                        let Ok(resolved) = file.canonicalize() else {
                            continue;
                        };
                        if resolved.starts_with(&root) && resolved.is_file() {
                            std::fs::remove_file(&resolved)?;
                            report.removed.push(file.clone());
                        } else {
                            warn!(path = %file.display(), "not removing file outside the output directory");
                        }
                    }
                }
                vec![name]
            }
            None => {
                if output_dir.exists() {
                    std::fs::remove_dir_all(&output_dir)?;
                    report.removed.push(output_dir.clone());
                }
                targets.keys().map(String::as_str).collect()
            }
        };

        for name in names {
            if self.status_of(name, &profile)? != TargetStatus::Pending {
                self.set_status(name, &profile, TargetStatus::Pending)?;
                report.reset.push(name.to_string());
            }
        }

        info!(
            profile = %profile,
            removed = report.removed.len(),
            reset = report.reset.len(),
            "cleaned"
        );
        Ok(report)
    }
}

fn store_error(target: &str, source: Error) -> Error {
    match source {
        // Name validation is a configuration problem, not a storage failure.
        Error::InvalidName(_) => source,
        source => Error::Store {
            target: target.to_string(),
            source: Box::new(source),
        },
    }
}
