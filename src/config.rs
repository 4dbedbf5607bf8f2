use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::agent::RetryPolicy;
use crate::{Error, Result};

/// Directory under the project root holding config, state, and logs.
pub const STATE_DIR: &str = ".intentc";

/// Where build state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Git,
    File,
}

/// How the agent command reports its results on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Claude-style JSON envelope around the result text.
    #[default]
    Json,
    /// Plain text with `FILE:` marker lines.
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    pub output_format: OutputFormat,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub exponential_backoff: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
            ],
            output_format: OutputFormat::Json,
            timeout_secs: 600,
            max_attempts: 3,
            retry_delay_ms: 2000,
            exponential_backoff: true,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
            exponential: self.exponential_backoff,
        }
    }

    /// Upper bound for one agent invocation including every retry.
    ///
    /// `None` when the bound does not fit in a `Duration`, which callers
    /// treat as no limit.
    pub fn total_timeout(&self) -> Option<Duration> {
        let policy = self.retry_policy();
        let attempts = policy.max_attempts;
        let mut total = self.timeout().checked_mul(attempts)?;
        // Backoff stops growing once the factor saturates at u32::MAX.
        let growing = attempts.saturating_sub(1).min(32);
        for n in 1..=growing {
            total = total.checked_add(policy.delay_for(n))?;
        }
        let flat = attempts.saturating_sub(1) - growing;
        if flat > 0 {
            total = total.checked_add(policy.delay_for(growing + 1).checked_mul(flat)?)?;
        }
        Some(total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build profile used when none is requested.
    pub default_profile: String,
    /// Directory with target definitions, relative to the project root.
    pub intent_dir: String,
    /// Directory holding one output directory per build profile.
    pub build_dir: String,
    pub state_backend: StateBackend,
    pub agent: AgentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: "default".to_string(),
            intent_dir: "intent".to_string(),
            build_dir: "build".to_string(),
            state_backend: StateBackend::Git,
            agent: AgentConfig::default(),
        }
    }
}

impl Config {
    pub fn state_dir(project_root: &Path) -> PathBuf {
        project_root.join(STATE_DIR)
    }

    pub fn config_path(project_root: &Path) -> PathBuf {
        Self::state_dir(project_root).join("config.toml")
    }

    /// Load `<root>/.intentc/config.toml`, falling back to defaults when absent.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = Self::config_path(project_root);
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        debug!(
            default_profile = %config.default_profile,
            build_dir = %config.build_dir,
            backend = ?config.state_backend,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self, project_root: &Path) -> Result<()> {
        let state_dir = Self::state_dir(project_root);
        if !state_dir.exists() {
            debug!(dir = %state_dir.display(), "creating state directory");
            fs::create_dir_all(&state_dir)?;
        }
        let path = Self::config_path(project_root);
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(Error::Config("agent.command must not be empty".to_string()));
        }
        validate_profile(&self.default_profile)?;
        Ok(())
    }

    pub fn intent_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.intent_dir)
    }

    /// Root of all per-profile output directories.
    pub fn build_root(&self, project_root: &Path) -> PathBuf {
        let dir = expand_tilde(&self.build_dir);
        if dir.is_absolute() {
            dir
        } else {
            project_root.join(dir)
        }
    }

    /// Output directory owned by `profile`.
    pub fn output_dir(&self, project_root: &Path, profile: &str) -> Result<PathBuf> {
        validate_profile(profile)?;
        Ok(self.build_root(project_root).join(profile))
    }
}

/// Build profile names become directory and ref path segments.
pub fn validate_profile(profile: &str) -> Result<()> {
    let invalid = profile.is_empty()
        || profile == "."
        || profile == ".."
        || profile.starts_with('-')
        || profile.starts_with('.')
        || profile
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
    if invalid {
        return Err(Error::InvalidProfile(profile.to_string()));
    }
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
