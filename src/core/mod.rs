//! Core domain models for intentc.
//!
//! This module contains the build targets, their persisted build results,
//! and the dependency graph that orders them.

pub mod dag;
pub mod target;

pub use dag::{DependencyGraph, Node};
pub use target::{BuildResult, GenerationId, Intent, Target, TargetStatus, ValidationDescriptor};
