//! Autopilot: drives a feature through an ordered pipeline of agent steps.
//!
//! Each step reads an instruction document, checks a prerequisite probe, runs
//! an agent under an idle watchdog (with one transparent retry on a stall) and
//! checks a validation probe. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (catalog, report normalization,
//!   command parsing, summaries). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (agent subprocess, probes, git,
//!   filesystem). Isolated behind traits to enable scripted doubles in tests.
//!
//! Orchestration modules ([`watchdog`], [`session`], [`bridge`], [`step`],
//! [`pipeline`], [`command`]) coordinate core logic with I/O.

pub mod bridge;
pub mod command;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod session;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watchdog;
