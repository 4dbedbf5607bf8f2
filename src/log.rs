//! Structured logging for intentc.
//!
//! Log levels:
//! - ERROR: Failures that abort a build
//! - WARN: Unexpected conditions that are recoverable (agent retries, stale state)
//! - INFO: Build progress (plan computed, target started/built/skipped)
//! - DEBUG: Detailed operation traces (store reads/writes, agent commands)
//! - TRACE: Very detailed traces (raw agent output)
//!
//! Debug mode can be enabled with `--debug` flag or `INTENTC_DEBUG=1` env var.
//! `RUST_LOG` overrides the level filter entirely.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;

static LOG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Name of the log file inside the state directory.
pub const LOG_FILE: &str = "intentc.log";

/// Whether `INTENTC_DEBUG` asks for debug logging.
pub fn env_debug() -> bool {
    std::env::var("INTENTC_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Level directive used when `RUST_LOG` is not set.
pub fn default_directive(debug: bool) -> &'static str {
    if debug || env_debug() {
        "intentc=debug"
    } else {
        "intentc=info"
    }
}

/// Initialize logging at info level.
pub fn init(log_dir: Option<&Path>) {
    init_with_debug(false, log_dir);
}

/// Initialize logging with explicit debug mode setting.
///
/// Lines go to `<log_dir>/intentc.log` (truncated on startup) when the
/// directory can be created, otherwise to stderr. Only the first call has any
/// effect.
pub fn init_with_debug(debug: bool, log_dir: Option<&Path>) {
    LOG_PATH.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

        let file = log_dir.and_then(|dir| {
            std::fs::create_dir_all(dir).ok()?;
            let path = dir.join(LOG_FILE);
            File::create(&path).ok().map(|f| (path, f))
        });

        match file {
            Some((path, file)) => {
                let _ = fmt()
                    .with_env_filter(filter)
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .try_init();
                Some(path)
            }
            None => {
                let _ = fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact()
                    .try_init();
                None
            }
        }
    });
}

/// Path of the active log file, if logging goes to a file.
pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().and_then(|p| p.as_deref())
}
