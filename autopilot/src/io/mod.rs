//! I/O adapters: agent subprocess, probes, git, filesystem and config.

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod executor;
pub mod git;
pub mod instructions;
pub mod probe;
pub mod process;
