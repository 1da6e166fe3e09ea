//! Test doubles for the executor, probe and instruction seams, plus a scratch
//! git repository.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::core::catalog::{PipelineStep, Probe};
use crate::core::types::RunState;
use crate::io::executor::{EventSink, ExecutorError, RunConfig, RunEvent, RunExecutor};
use crate::io::instructions::{InstructionSource, checked_document};
use crate::io::probe::{ProbeOutcome, ProbeRunner};

/// Behavior of one scripted executor call.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    /// Resolve immediately with this output.
    Resolve(Value),
    /// Throw a transport error.
    Throw(String),
    /// Emit nothing and wait until cancelled.
    Stall,
    /// Emit `events` text events spaced by `every`, then resolve.
    Trickle {
        events: u32,
        every: Duration,
        output: Value,
    },
}

/// Executor that plays back a script, one entry per call.
///
/// Once the script is exhausted every call resolves with `lastMessage`.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedRun>>,
    configs: Mutex<Vec<RunConfig>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<ScriptedRun>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.configs.lock().len()
    }

    /// Configs received so far, in call order.
    pub fn configs(&self) -> Vec<RunConfig> {
        self.configs.lock().clone()
    }
}

#[async_trait]
impl RunExecutor for ScriptedExecutor {
    async fn run(
        &self,
        config: &RunConfig,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<RunState, ExecutorError> {
        self.configs.lock().push(config.clone());
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedRun::Resolve(json!({"type": "lastMessage"})));

        match next {
            ScriptedRun::Resolve(output) => Ok(RunState::with_output(output)),
            ScriptedRun::Throw(message) => Err(ExecutorError::Transport(message)),
            ScriptedRun::Stall => {
                cancel.cancelled().await;
                Err(ExecutorError::Cancelled)
            }
            ScriptedRun::Trickle {
                events: count,
                every,
                output,
            } => {
                for i in 0..count {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                        _ = tokio::time::sleep(every) => {}
                    }
                    events.emit(RunEvent::Text(format!("event {i}")));
                }
                Ok(RunState::with_output(output))
            }
        }
    }
}

/// Probe runner that passes everything except configured commands.
#[derive(Debug, Default)]
pub struct ScriptedProbeRunner {
    failures: Vec<(String, ProbeOutcome)>,
    cancels: Vec<(String, CancellationToken)>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedProbeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes whose command contains `needle` produce `outcome`.
    pub fn with_outcome(mut self, needle: impl Into<String>, outcome: ProbeOutcome) -> Self {
        self.failures.push((needle.into(), outcome));
        self
    }

    /// Probes whose command contains `needle` cancel `token` while running.
    pub fn cancel_on(mut self, needle: impl Into<String>, token: CancellationToken) -> Self {
        self.cancels.push((needle.into(), token));
        self
    }

    /// Commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ProbeRunner for ScriptedProbeRunner {
    async fn run(&self, probe: &Probe) -> Result<ProbeOutcome> {
        self.seen.lock().push(probe.command.clone());
        for (needle, token) in &self.cancels {
            if probe.command.contains(needle.as_str()) {
                token.cancel();
            }
        }
        let outcome = self
            .failures
            .iter()
            .find(|(needle, _)| probe.command.contains(needle.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(ProbeOutcome::pass);
        Ok(outcome)
    }
}

/// In-memory instruction documents keyed by path.
#[derive(Debug, Default)]
pub struct MemoryInstructionSource {
    docs: HashMap<PathBuf, String>,
}

impl MemoryInstructionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A short document for every step in `steps`.
    pub fn for_steps(steps: &[PipelineStep]) -> Self {
        let docs = steps
            .iter()
            .map(|step| {
                (
                    step.instruction_path.clone(),
                    format!("# {}\n\nFollow the {} workflow.\n", step.label, step.label),
                )
            })
            .collect();
        Self { docs }
    }

    pub fn with(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.docs.insert(path.into(), contents.into());
        self
    }

    pub fn without(mut self, path: &Path) -> Self {
        self.docs.remove(path);
        self
    }
}

impl InstructionSource for MemoryInstructionSource {
    fn read(&self, path: &Path) -> Result<String> {
        let contents = self
            .docs
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no document at {}", path.display()))?;
        checked_document(path, contents)
    }
}

/// Scratch git repository with one commit on its initial branch.
#[derive(Debug)]
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo")?;
        let repo = Self { dir };
        repo.git(&["init"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        fs::write(repo.path().join("README.md"), "hi\n").context("write README")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "-m", "chore: init"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.git(&["checkout", "-b", branch])
    }

    /// Write `contents` at `relative`, creating parent directories.
    pub fn write(&self, relative: impl AsRef<Path>, contents: &str) -> Result<()> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .status()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !status.success() {
            return Err(anyhow!("git {} failed", args.join(" ")));
        }
        Ok(())
    }
}
