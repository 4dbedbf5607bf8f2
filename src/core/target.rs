//! Target data model for the build graph.
//!
//! Targets are the named units of work handed to an agent. They are rebuilt
//! from the target provider on every run; only their build results persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::Error;

/// Unique identifier for one build attempt of one target.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(pub Uuid);

impl GenerationId {
    /// Create a new unique generation identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GenerationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Build status of a target under one build profile.
///
/// Transitions: `pending -> building -> built | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// Never built, or reset by a clean.
    #[default]
    Pending,
    /// A build attempt started and has not finished. Seen after a crash or
    /// cancellation, it means the attempt was interrupted.
    Building,
    /// The latest attempt succeeded.
    Built,
    /// The latest attempt failed.
    Failed,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Building => "building",
            TargetStatus::Built => "built",
            TargetStatus::Failed => "failed",
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, TargetStatus::Built)
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TargetStatus::Pending),
            "building" => Ok(TargetStatus::Building),
            "built" => Ok(TargetStatus::Built),
            "failed" => Ok(TargetStatus::Failed),
            other => Err(Error::Storage(format!("unknown target status '{}'", other))),
        }
    }
}

/// An opaque validation descriptor attached to a target.
///
/// The build core never interprets these; they are forwarded to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// The provider-owned part of a target: what to build and what it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Free-form description handed to the agent.
    pub content: String,
    /// Declared dependency names, in declaration order.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A named unit of work in the build graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub intent: Intent,
    pub validations: Vec<ValidationDescriptor>,
    /// Resolved direct dependencies, filled in by the orchestrator once every
    /// declared name has been matched against the loaded target set.
    pub dependencies: Vec<String>,
}

impl Target {
    pub fn new(name: &str, intent: Intent) -> Self {
        Self {
            name: name.to_string(),
            intent,
            validations: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_validations(mut self, validations: Vec<ValidationDescriptor>) -> Self {
        self.validations = validations;
        self
    }

    /// Declared dependency names as written by the provider.
    pub fn declared_dependencies(&self) -> &[String] {
        &self.intent.depends_on
    }
}

/// Immutable record of one build attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub target: String,
    pub generation_id: GenerationId,
    pub profile: String,
    pub output_dir: PathBuf,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Failure message for unsuccessful attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    /// Record a successful attempt that produced `files`.
    pub fn succeeded(
        target: &str,
        generation_id: GenerationId,
        profile: &str,
        output_dir: PathBuf,
        files: Vec<PathBuf>,
    ) -> Self {
        Self {
            target: target.to_string(),
            generation_id,
            profile: profile.to_string(),
            output_dir,
            success: true,
            timestamp: Utc::now(),
            files,
            error: None,
        }
    }

    /// Record a failed attempt.
    pub fn failed(
        target: &str,
        generation_id: GenerationId,
        profile: &str,
        output_dir: PathBuf,
        error: &str,
    ) -> Self {
        Self {
            target: target.to_string(),
            generation_id,
            profile: profile.to_string(),
            output_dir,
            success: false,
            timestamp: Utc::now(),
            files: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}
