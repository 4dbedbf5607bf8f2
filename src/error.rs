use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Duplicate target: {0}")]
    DuplicateTarget(String),

    #[error("Target '{target}' depends on unknown target '{dependency}'")]
    UnresolvedDependency { target: String, dependency: String },

    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Invalid build profile name: {0:?}")]
    InvalidProfile(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Target '{target}' cannot start: dependency '{dependency}' is not built")]
    DependencyNotBuilt { target: String, dependency: String },

    #[error("Agent not available: {0}")]
    AgentNotAvailable(String),

    #[error("Agent failed: {0}")]
    AgentFailed(String),

    #[error("Could not parse agent output: {0}")]
    OutputParse(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Build of target '{target}' failed: {source}")]
    TargetFailed {
        target: String,
        #[source]
        source: Box<Error>,
    },

    #[error("State store error: {0}")]
    Storage(String),

    #[error("State store error for target '{target}': {source}")]
    Store {
        target: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Build result already recorded: {target}@{generation}")]
    ResultExists { target: String, generation: String },
}

impl Error {
    /// Configuration errors are reported before any build work happens.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::TargetNotFound(_)
                | Error::DuplicateTarget(_)
                | Error::UnresolvedDependency { .. }
                | Error::CycleDetected { .. }
                | Error::InvalidProfile(_)
                | Error::InvalidName(_)
                | Error::TomlParse(_)
        )
    }

    /// True when this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::TargetFailed { source, .. } | Error::Store { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
