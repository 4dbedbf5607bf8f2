use std::path::PathBuf;

use serde::Serialize;

use crate::core::{BuildResult, TargetStatus};

/// What the caller wants built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Single-target scope; `None` builds every target that is not yet built.
    pub target: Option<String>,
    /// Build profile; `None` uses the configured default.
    pub profile: Option<String>,
    pub force: bool,
    pub dry_run: bool,
}

impl BuildRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn target(name: &str) -> Self {
        Self {
            target: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    Build,
    /// Already built for the profile and not forced.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTarget {
    pub name: String,
    /// Status when the plan was computed.
    pub status: TargetStatus,
    pub action: PlannedAction,
}

/// Ordered, dependency-first list of targets for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub profile: String,
    pub output_dir: PathBuf,
    pub targets: Vec<PlannedTarget>,
}

impl BuildPlan {
    pub fn names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }

    /// Targets the plan would hand to the agent.
    pub fn to_build(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| t.action == PlannedAction::Build)
            .map(|t| t.name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    Built(BuildResult),
    Skipped { target: String },
}

impl TargetOutcome {
    pub fn target(&self) -> &str {
        match self {
            TargetOutcome::Built(result) => &result.target,
            TargetOutcome::Skipped { target } => target,
        }
    }
}

/// What one `build` call did.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub plan: BuildPlan,
    pub dry_run: bool,
    pub outcomes: Vec<TargetOutcome>,
}

impl BuildReport {
    pub fn built(&self) -> Vec<&BuildResult> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TargetOutcome::Built(result) => Some(result),
                TargetOutcome::Skipped { .. } => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TargetOutcome::Skipped { target } => Some(target.as_str()),
                TargetOutcome::Built(_) => None,
            })
            .collect()
    }
}

/// Current state of one target under a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetState {
    pub name: String,
    pub dependencies: Vec<String>,
    pub status: TargetStatus,
    pub latest: Option<BuildResult>,
}

impl TargetState {
    /// Reset by `clean` after a successful build: pending, although the
    /// latest recorded result succeeded.
    pub fn is_cleaned(&self) -> bool {
        self.status == TargetStatus::Pending && self.latest.as_ref().is_some_and(|r| r.success)
    }
}

/// What `clean` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub profile: String,
    pub removed: Vec<PathBuf>,
    /// Targets whose status went back to pending.
    pub reset: Vec<String>,
}
