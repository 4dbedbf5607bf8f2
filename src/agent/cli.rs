//! Command-line agent executor.
//!
//! [`CliAgent`] runs an external command (Claude Code in headless mode by
//! default) once per target. What it sends and how it reads the answer are
//! injected as a [`PromptBuilder`] and an [`OutputParser`].

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Agent, AgentContext, RetryPolicy};
use crate::config::{AgentConfig, OutputFormat};
use crate::{Error, Result};

/// Default per-attempt timeout (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// `FILE: <path>` marker lines in agent output.
static FILE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*FILE:\s*(\S(?:.*\S)?)\s*$").unwrap());

/// Turns a build context into the text handed to the agent command.
pub trait PromptBuilder: Send + Sync {
    fn build_prompt(&self, ctx: &AgentContext) -> String;
}

/// Extracts the produced file list from the agent command's stdout.
pub trait OutputParser: Send + Sync {
    fn parse(&self, output: &str, ctx: &AgentContext) -> Result<Vec<PathBuf>>;
}

/// Default prompt: the intent plus the file-marker protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentPromptBuilder;

impl PromptBuilder for IntentPromptBuilder {
    fn build_prompt(&self, ctx: &AgentContext) -> String {
        let dependencies = if ctx.dependencies.is_empty() {
            "Dependencies: none".to_string()
        } else {
            format!(
                "Dependencies (already built): {}",
                ctx.dependencies.join(", ")
            )
        };

        let mut prompt = format!(
            "You are building target '{}' for build profile '{}' (generation {}).\n\n\
             Project root: {}\n\
             Write every generated file under: {}\n\
             {}\n\n\
             ## Intent\n\n\
             {}\n",
            ctx.target,
            ctx.profile,
            ctx.generation_id.short(),
            ctx.project_root.display(),
            ctx.output_dir.display(),
            dependencies,
            ctx.intent_content.trim_end()
        );

        if !ctx.validations.is_empty() {
            prompt.push_str("\n## Validations\n\n");
            for v in &ctx.validations {
                let kind = if v.kind.is_empty() { "check" } else { &v.kind };
                if v.description.is_empty() {
                    prompt.push_str(&format!("- {} ({})\n", v.name, kind));
                } else {
                    prompt.push_str(&format!("- {} ({}): {}\n", v.name, kind, v.description));
                }
            }
        }

        prompt.push_str(
            "\n## Output\n\n\
             When you are done, list every file you created or changed, one per line, as:\n\
             FILE: <path relative to the output directory>",
        );
        prompt
    }
}

/// Reads `FILE: <path>` lines. Relative paths are joined onto the output
/// directory; repeats are dropped, first occurrence wins. Paths with a `..`
/// component are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerOutputParser;

impl MarkerOutputParser {
    fn collect(text: &str, output_dir: &Path) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for caps in FILE_MARKER_RE.captures_iter(text) {
            let raw = Path::new(&caps[1]);
            if raw.components().any(|c| c == Component::ParentDir) {
                warn!(path = %raw.display(), "ignoring reported file outside the output directory");
                continue;
            }
            let path = if raw.is_absolute() {
                raw.to_path_buf()
            } else {
                output_dir.join(raw)
            };
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
        files
    }
}

impl OutputParser for MarkerOutputParser {
    fn parse(&self, output: &str, ctx: &AgentContext) -> Result<Vec<PathBuf>> {
        Ok(Self::collect(output, &ctx.output_dir))
    }
}

/// Envelope printed by `claude -p --output-format json`.
#[derive(Debug, Deserialize)]
struct ClaudeEnvelope {
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    session_id: Option<String>,
    total_cost_usd: Option<f64>,
}

/// Parses the Claude JSON envelope, then reads file markers from its `result`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeJsonParser;

impl OutputParser for ClaudeJsonParser {
    fn parse(&self, output: &str, ctx: &AgentContext) -> Result<Vec<PathBuf>> {
        let envelope: ClaudeEnvelope = serde_json::from_str(output.trim())
            .map_err(|e| Error::OutputParse(format!("expected Claude JSON output: {}", e)))?;

        let failed = envelope.is_error
            || envelope
                .subtype
                .as_deref()
                .is_some_and(|s| s.starts_with("error"));
        if failed {
            let message = envelope
                .error
                .or(envelope.result)
                .or(envelope.subtype)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(Error::AgentFailed(message));
        }

        debug!(
            session_id = envelope.session_id.as_deref().unwrap_or("-"),
            cost_usd = envelope.total_cost_usd.unwrap_or_default(),
            "claude response"
        );
        let text = envelope.result.unwrap_or_default();
        Ok(MarkerOutputParser::collect(&text, &ctx.output_dir))
    }
}

/// Runs an external command per target, with retry and per-attempt timeout.
#[derive(Clone)]
pub struct CliAgent {
    binary: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    retry: RetryPolicy,
    prompt_builder: Arc<dyn PromptBuilder>,
    output_parser: Arc<dyn OutputParser>,
}

impl std::fmt::Debug for CliAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliAgent")
            .field("binary", &self.binary)
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl CliAgent {
    /// Plain-text markers, one attempt, default timeout.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::none(),
            prompt_builder: Arc::new(IntentPromptBuilder),
            output_parser: Arc::new(MarkerOutputParser),
        }
    }

    /// Build from the `[agent]` config table, resolving the command on `PATH`.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let binary = which::which(&config.command)
            .map_err(|_| Error::AgentNotAvailable(config.command.clone()))?;
        let parser: Arc<dyn OutputParser> = match config.output_format {
            OutputFormat::Json => Arc::new(ClaudeJsonParser),
            OutputFormat::Text => Arc::new(MarkerOutputParser),
        };
        Ok(Self::new(binary)
            .with_args(config.args.iter().cloned())
            .with_timeout(config.timeout())
            .with_retry(config.retry_policy())
            .with_output_parser(parser))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn with_output_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.output_parser = parser;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn command(&self, ctx: &AgentContext, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .arg(prompt)
            .current_dir(&ctx.output_dir)
            .env("INTENTC_TARGET", &ctx.target)
            .env("INTENTC_PROFILE", &ctx.profile)
            .env("INTENTC_GENERATION", ctx.generation_id.to_string())
            .env("INTENTC_OUTPUT_DIR", &ctx.output_dir)
            .env("INTENTC_PROJECT_ROOT", &ctx.project_root)
            .env("INTENTC_DEPENDENCIES", ctx.dependencies.join(","))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_once(
        &self,
        ctx: &AgentContext,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let mut command = self.command(ctx, prompt);
        let run = tokio::time::timeout(self.timeout, command.output());
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = run => result.map_err(|_| Error::Timeout(self.timeout))?,
        };
        let output = output.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::AgentNotAvailable(self.binary.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "{} exited with code {}",
                    self.binary.display(),
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::AgentFailed(message));
        }

        self.output_parser.parse(&stdout, ctx)
    }
}

fn is_retryable(err: &Error) -> bool {
    !matches!(err, Error::Cancelled | Error::AgentNotAvailable(_))
}

#[async_trait]
impl Agent for CliAgent {
    async fn build(&self, ctx: &AgentContext, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&ctx.output_dir).await?;
        let prompt = self.prompt_builder.build_prompt(ctx);
        let attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            debug!(
                target_name = %ctx.target,
                profile = %ctx.profile,
                attempt,
                "running agent command"
            );
            match self.run_once(ctx, &prompt, cancel).await {
                Ok(files) => {
                    info!(
                        target_name = %ctx.target,
                        files = files.len(),
                        attempt,
                        "agent finished"
                    );
                    return Ok(files);
                }
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        target_name = %ctx.target,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "agent attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        self.binary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cli")
    }
}
