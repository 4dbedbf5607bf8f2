//! Integration test suite for intentc.
//!
//! These tests drive the orchestrator end to end against real state stores
//! and target providers on disk.
//!
//! # Test Categories
//!
//! - `build_flow`: ordering, skipping, failure and cancellation semantics
//! - `profiles`: build profile isolation and persistence across runs
//! - `cli_agent`: the command-line agent driven by the orchestrator
//!
//! # CI Compatibility
//!
//! Agents are either in-process mocks or small `sh` scripts, so no test
//! makes a real model call.

mod fixtures;

mod build_flow;
mod cli_agent;
mod profiles;
