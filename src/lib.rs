pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestrator;
pub mod provider;
pub mod state;

pub use error::{Error, Result};
pub use orchestrator::{BuildReport, BuildRequest, Orchestrator};
