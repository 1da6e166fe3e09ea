//! Probe runner: evaluates a step's prerequisite/validation shell checks.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::core::catalog::Probe;
use crate::io::config::ProbeConfig;
use crate::io::process::run_captured;

/// Result of evaluating one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// `None` when the probe was killed (signal or timeout).
    pub exit_code: Option<i32>,
    /// Leading lines of error output, possibly empty.
    pub diagnostic: String,
}

impl ProbeOutcome {
    pub fn pass() -> Self {
        Self {
            exit_code: Some(0),
            diagnostic: String::new(),
        }
    }

    pub fn fail(exit_code: i32, diagnostic: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code rendered for messages (`unknown` when killed).
    pub fn exit_code_label(&self) -> String {
        self.exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, probe: &Probe) -> Result<ProbeOutcome>;
}

/// Runs probes through `sh -c` in the project root.
#[derive(Debug, Clone)]
pub struct ShellProbeRunner {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    diagnostic_lines: usize,
}

impl ShellProbeRunner {
    pub fn new(workdir: impl Into<PathBuf>, config: &ProbeConfig) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
            diagnostic_lines: config.diagnostic_lines,
        }
    }
}

#[async_trait]
impl ProbeRunner for ShellProbeRunner {
    #[instrument(skip_all, fields(command = %probe.command))]
    async fn run(&self, probe: &Probe) -> Result<ProbeOutcome> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&probe.command).current_dir(&self.workdir);
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;

        // The process helper blocks on the child; keep it off the async workers.
        let output = tokio::task::spawn_blocking(move || run_captured(cmd, timeout, limit))
            .await
            .context("join probe task")??;

        let outcome = ProbeOutcome {
            exit_code: output.exit_code(),
            diagnostic: output.diagnostic(self.diagnostic_lines),
        };
        if outcome.passed() {
            debug!("probe passed");
        } else {
            warn!(exit_code = ?outcome.exit_code, timed_out = output.timed_out, "probe failed");
        }
        Ok(outcome)
    }
}
