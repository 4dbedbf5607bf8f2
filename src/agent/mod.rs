//! The Agent boundary.
//!
//! An [`Agent`] turns one target's intent into files under the profile output
//! directory. The orchestrator sees a single outcome per call; retries happen
//! inside the agent.

mod cli;

pub use cli::{
    ClaudeJsonParser, CliAgent, IntentPromptBuilder, MarkerOutputParser, OutputParser,
    PromptBuilder,
};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{GenerationId, ValidationDescriptor};
use crate::Result;

/// Everything an agent is told about one build attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentContext {
    pub target: String,
    /// Names of the target's direct dependencies.
    pub dependencies: Vec<String>,
    pub intent_content: String,
    pub validations: Vec<ValidationDescriptor>,
    pub project_root: PathBuf,
    pub generation_id: GenerationId,
    pub profile: String,
    /// Working root for every target built under `profile`.
    pub output_dir: PathBuf,
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Build the target described by `ctx`, returning the files produced.
    ///
    /// Implementations should return [`crate::Error::Cancelled`] promptly once
    /// `cancel` fires.
    async fn build(&self, ctx: &AgentContext, cancel: &CancellationToken) -> Result<Vec<PathBuf>>;

    fn name(&self) -> &str {
        "agent"
    }
}

/// Bounded retry with a fixed or doubling delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            exponential: false,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential || attempt <= 1 {
            return self.delay;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.delay.saturating_mul(factor)
    }
}
