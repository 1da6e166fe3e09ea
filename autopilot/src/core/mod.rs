//! Deterministic, pure logic shared by the orchestrator and the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod branch;
pub mod catalog;
pub mod command;
pub mod report;
pub mod summary;
pub mod types;
