//! Pipeline orchestration: decide whether `Specify` is needed, then run the
//! catalog's steps in order, stopping at the first step that is not done.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::bridge::PendingQuestionBridge;
use crate::core::branch::is_feature_branch;
use crate::core::catalog::{PipelineStep, StepCatalog};
use crate::core::types::{FailureKind, PipelineRunResult, StepError, StepResult};
use crate::io::agent::AgentCommandExecutor;
use crate::io::config::AutopilotConfig;
use crate::io::executor::{EventObserver, RunExecutor};
use crate::io::git::Git;
use crate::io::instructions::FileInstructionSource;
use crate::io::probe::ShellProbeRunner;
use crate::session::{RunSession, SessionPolicy};
use crate::step::{SharedArgs, StepRunner};

/// Why `Specify` was included or skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecifyDecision {
    /// The current feature branch already has a filled-in spec.
    Skip { branch: String },
    /// The branch could not be read.
    BranchUnavailable(String),
    NotFeatureBranch(String),
    SpecMissing { branch: String },
    /// The spec is still byte-identical to the template.
    SpecIsTemplate { branch: String },
    SpecUnreadable { branch: String, error: String },
}

impl SpecifyDecision {
    pub fn include_specify(&self) -> bool {
        !matches!(self, SpecifyDecision::Skip { .. })
    }
}

impl fmt::Display for SpecifyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecifyDecision::Skip { branch } => {
                write!(f, "Feature branch {branch} already has a spec; skipping Specify.")
            }
            SpecifyDecision::BranchUnavailable(error) => {
                write!(f, "Could not read the current branch ({error}); running Specify.")
            }
            SpecifyDecision::NotFeatureBranch(branch) => {
                write!(f, "Branch {branch} is not a feature branch; running Specify.")
            }
            SpecifyDecision::SpecMissing { branch } => {
                write!(f, "No spec found for {branch}; running Specify.")
            }
            SpecifyDecision::SpecIsTemplate { branch } => {
                write!(f, "Detected feature branch ({branch}) with template spec; running Specify.")
            }
            SpecifyDecision::SpecUnreadable { branch, error } => {
                write!(f, "Could not read the spec for {branch} ({error}); running Specify.")
            }
        }
    }
}

/// Decides whether `Specify` must run, from the branch and the spec file.
#[derive(Debug, Clone)]
pub struct SpecifyProbe {
    root: PathBuf,
    specs_dir: PathBuf,
    template: PathBuf,
}

impl SpecifyProbe {
    pub fn new(
        root: impl Into<PathBuf>,
        specs_dir: impl Into<PathBuf>,
        template: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            specs_dir: specs_dir.into(),
            template: template.into(),
        }
    }

    pub fn from_config(root: &Path, config: &AutopilotConfig) -> Self {
        Self::new(root, &config.paths.specs_dir, &config.paths.spec_template)
    }

    /// Evaluate against the repository's current branch.
    pub fn evaluate(&self, git: &Git) -> SpecifyDecision {
        match git.current_branch() {
            Ok(branch) => self.decide(&branch),
            Err(err) => SpecifyDecision::BranchUnavailable(format!("{err:#}")),
        }
    }

    /// Evaluate for a known branch name.
    pub fn decide(&self, branch: &str) -> SpecifyDecision {
        let branch = branch.trim();
        if !is_feature_branch(branch) {
            return SpecifyDecision::NotFeatureBranch(branch.to_string());
        }
        let spec_path = self.root.join(&self.specs_dir).join(branch).join("spec.md");
        let spec = match fs::read(&spec_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return SpecifyDecision::SpecMissing {
                    branch: branch.to_string(),
                };
            }
            Err(err) => {
                return SpecifyDecision::SpecUnreadable {
                    branch: branch.to_string(),
                    error: err.to_string(),
                };
            }
        };
        match fs::read(self.root.join(&self.template)) {
            Ok(template) if template == spec => SpecifyDecision::SpecIsTemplate {
                branch: branch.to_string(),
            },
            Ok(_) => SpecifyDecision::Skip {
                branch: branch.to_string(),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no spec template; treating spec as filled in");
                SpecifyDecision::Skip {
                    branch: branch.to_string(),
                }
            }
            Err(err) => SpecifyDecision::SpecUnreadable {
                branch: branch.to_string(),
                error: format!("template: {err}"),
            },
        }
    }
}

/// Progress notifications emitted while the pipeline runs.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    SpecifyDecided(&'a SpecifyDecision),
    StepStarted {
        label: &'a str,
        index: usize,
        total: usize,
    },
    StepFinished {
        label: &'a str,
        result: &'a StepResult,
    },
}

/// Runs the full ordered pipeline for one feature description.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    runner: StepRunner,
    catalog: StepCatalog,
    specify: SpecifyProbe,
    git: Git,
}

impl PipelineExecutor {
    pub fn new(runner: StepRunner, catalog: StepCatalog, specify: SpecifyProbe, git: Git) -> Self {
        Self {
            runner,
            catalog,
            specify,
            git,
        }
    }

    /// Wire the production adapters for a project root.
    pub fn from_config(
        root: &Path,
        config: &AutopilotConfig,
        bridge: Arc<PendingQuestionBridge>,
        observer: Option<EventObserver>,
    ) -> Result<Self> {
        let executor: Arc<dyn RunExecutor> =
            Arc::new(AgentCommandExecutor::new(&config.agent, root, bridge)?);
        let mut session = RunSession::new(executor, SessionPolicy::from(&config.idle));
        if let Some(observer) = observer {
            session = session.with_observer(observer);
        }
        let runner = StepRunner::new(
            session,
            Arc::new(ShellProbeRunner::new(root, &config.probe)),
            Arc::new(FileInstructionSource::new(root)),
            &config.agent.step_agent,
        );
        Ok(Self::new(
            runner,
            config.catalog(),
            SpecifyProbe::from_config(root, config),
            Git::new(root),
        ))
    }

    /// Decide on `Specify` and return the steps that would run.
    pub async fn plan(&self) -> (SpecifyDecision, Vec<PipelineStep>) {
        let probe = self.specify.clone();
        let git = self.git.clone();
        let decision = match tokio::task::spawn_blocking(move || probe.evaluate(&git)).await {
            Ok(decision) => decision,
            Err(err) => SpecifyDecision::BranchUnavailable(err.to_string()),
        };
        let steps = self.catalog.steps(decision.include_specify());
        (decision, steps)
    }

    /// Run the whole pipeline.
    #[instrument(skip_all)]
    pub async fn run<F>(&self, args: &SharedArgs, mut on_event: F) -> PipelineRunResult
    where
        F: FnMut(PipelineEvent<'_>) + Send,
    {
        if args.feature_description.trim().is_empty() {
            warn!("empty feature description");
            return PipelineRunResult {
                ok: false,
                failed_step: None,
                error: Some(StepError::new(
                    FailureKind::PrerequisiteFailed,
                    "No feature description provided.",
                )),
                steps_attempted: Vec::new(),
            };
        }
        let (decision, steps) = self.plan().await;
        info!(decision = %decision, steps = steps.len(), "pipeline planned");
        on_event(PipelineEvent::SpecifyDecided(&decision));
        self.run_steps(&steps, args, on_event).await
    }

    /// Run `steps` sequentially; the first non-done result ends the run.
    pub async fn run_steps<F>(
        &self,
        steps: &[PipelineStep],
        args: &SharedArgs,
        mut on_event: F,
    ) -> PipelineRunResult
    where
        F: FnMut(PipelineEvent<'_>) + Send,
    {
        let mut attempted = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            if args.cancel.is_cancelled() {
                info!(next = %step.label, "cancelled between steps");
                return PipelineRunResult {
                    ok: false,
                    failed_step: None,
                    error: Some(StepError::new(
                        FailureKind::UserCancelled,
                        "Run cancelled by user.",
                    )),
                    steps_attempted: attempted,
                };
            }
            attempted.push(step.label.clone());
            on_event(PipelineEvent::StepStarted {
                label: &step.label,
                index,
                total: steps.len(),
            });
            let result = self.runner.execute(step, args).await;
            on_event(PipelineEvent::StepFinished {
                label: &step.label,
                result: &result,
            });

            if let Some(err) = result.error() {
                warn!(step = %step.label, kind = ?err.kind, "pipeline stopped");
                return PipelineRunResult {
                    ok: false,
                    failed_step: Some(step.label.clone()),
                    error: Some(err.clone()),
                    steps_attempted: attempted,
                };
            }
        }
        info!(steps = attempted.len(), "pipeline completed");
        PipelineRunResult {
            ok: true,
            failed_step: None,
            error: None,
            steps_attempted: attempted,
        }
    }
}
