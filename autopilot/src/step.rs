//! Orchestration for a single pipeline step.
//!
//! A step walks `Idle -> PrereqChecking -> Executing -> Validating -> Done`,
//! leaving early with the matching failure when a phase does not pass:
//!
//! 1. The instruction document must be readable and non-empty.
//! 2. The prerequisite probe (if any) must exit 0.
//! 3. The agent run must succeed and its output must not report failure.
//! 4. The validation probe (if any) must exit 0.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::catalog::{PipelineStep, Probe};
use crate::core::report::StepReport;
use crate::core::types::{FailureKind, RunStatus, StepError, StepPhase, StepResult};
use crate::io::executor::RunConfig;
use crate::io::instructions::InstructionSource;
use crate::io::probe::{ProbeOutcome, ProbeRunner};
use crate::session::RunSession;

/// Inputs shared by every step of one pipeline run.
#[derive(Debug, Clone)]
pub struct SharedArgs {
    pub feature_description: String,
    /// User cancellation for the whole pipeline run.
    pub cancel: CancellationToken,
}

impl SharedArgs {
    pub fn new(feature_description: impl Into<String>) -> Self {
        Self {
            feature_description: feature_description.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Runs one [`PipelineStep`] end to end.
#[derive(Clone)]
pub struct StepRunner {
    session: RunSession,
    probes: Arc<dyn ProbeRunner>,
    instructions: Arc<dyn InstructionSource>,
    agent: String,
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("session", &self.session)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl StepRunner {
    pub fn new(
        session: RunSession,
        probes: Arc<dyn ProbeRunner>,
        instructions: Arc<dyn InstructionSource>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            session,
            probes,
            instructions,
            agent: agent.into(),
        }
    }

    pub async fn execute(&self, step: &PipelineStep, args: &SharedArgs) -> StepResult {
        self.execute_with(step, args, |_| {}).await
    }

    /// Execute `step`, reporting each phase transition to `on_phase`.
    #[instrument(skip_all, fields(step = %step.label))]
    pub async fn execute_with<F>(
        &self,
        step: &PipelineStep,
        args: &SharedArgs,
        mut on_phase: F,
    ) -> StepResult
    where
        F: FnMut(StepPhase) + Send,
    {
        let doc = &step.instruction_path;
        on_phase(StepPhase::Idle);

        let document = match self.instructions.read(doc) {
            Ok(document) => document,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "instruction document unavailable");
                return StepResult::PrereqFailed(StepError::new(
                    FailureKind::MissingInstructionDocument,
                    format!("Instruction document missing or unreadable: {}", doc.display()),
                ));
            }
        };

        if args.cancel.is_cancelled() {
            info!("cancelled before prerequisite");
            return cancelled_before_execution();
        }

        on_phase(StepPhase::PrereqChecking);
        if let Some(probe) = &step.prerequisite {
            let outcome = self.probe(probe).await;
            if !outcome.passed() {
                let message =
                    probe_failure_message("Prerequisite script failed", doc, &outcome);
                warn!(exit_code = %outcome.exit_code_label(), "prerequisite failed");
                return StepResult::PrereqFailed(StepError::new(
                    FailureKind::PrerequisiteFailed,
                    message,
                ));
            }
        }

        if args.cancel.is_cancelled() {
            info!("cancelled before execution");
            return cancelled_before_execution();
        }

        on_phase(StepPhase::Executing);
        let path = doc.display().to_string();
        let config = RunConfig::new(&self.agent, &args.feature_description)
            .with_attachment(&path, document)
            .with_params(json!({
                "commandPath": path,
                "featureDescription": args.feature_description,
            }))
            .with_cancel(args.cancel.clone());
        let outcome = self.session.run(&config).await;

        match outcome.status {
            RunStatus::Cancelled => {
                let message = outcome
                    .error_message
                    .unwrap_or_else(|| "Run cancelled by user.".to_string());
                return StepResult::ExecutionFailed(StepError::new(
                    FailureKind::UserCancelled,
                    message,
                ));
            }
            RunStatus::Failed => {
                let kind = outcome.failure.unwrap_or(FailureKind::ExecutionFailed);
                let message = outcome
                    .error_message
                    .unwrap_or_else(|| format!("{} failed.", step.label));
                return StepResult::ExecutionFailed(StepError::new(kind, message));
            }
            RunStatus::Success => {}
        }

        let output = outcome.state.map(|state| state.output).unwrap_or_default();
        if let StepReport::Failed { message } = StepReport::from_output(&output) {
            warn!(%message, "step reported failure");
            return StepResult::ExecutionFailed(StepError::new(
                FailureKind::ExecutionFailed,
                message,
            ));
        }

        on_phase(StepPhase::Validating);
        if let Some(probe) = &step.validation {
            let outcome = self.probe(probe).await;
            if !outcome.passed() {
                let message = probe_failure_message("Validation failed", doc, &outcome);
                warn!(exit_code = %outcome.exit_code_label(), "validation failed");
                return StepResult::ValidationFailed(StepError::new(
                    FailureKind::ValidationFailed,
                    message,
                ));
            }
        }

        info!(attempts = outcome.attempts, "step done");
        StepResult::Done
    }

    async fn probe(&self, probe: &Probe) -> ProbeOutcome {
        match self.probes.run(probe).await {
            Ok(outcome) => outcome,
            Err(err) => ProbeOutcome {
                exit_code: None,
                diagnostic: format!("{err:#}"),
            },
        }
    }
}

fn cancelled_before_execution() -> StepResult {
    StepResult::ExecutionFailed(StepError::new(
        FailureKind::UserCancelled,
        "Run cancelled by user.",
    ))
}

fn probe_failure_message(prefix: &str, doc: &Path, outcome: &ProbeOutcome) -> String {
    let mut message = format!(
        "{prefix} for {} (exit code {})",
        doc.display(),
        outcome.exit_code_label()
    );
    if !outcome.diagnostic.trim().is_empty() {
        message.push_str("\n\n");
        message.push_str(outcome.diagnostic.trim());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{PLAN, StepCatalog};
    use crate::session::SessionPolicy;
    use crate::test_support::{
        MemoryInstructionSource, ScriptedExecutor, ScriptedProbeRunner, ScriptedRun,
    };

    fn plan_step() -> PipelineStep {
        StepCatalog::default()
            .tail()
            .into_iter()
            .find(|step| step.label == PLAN)
            .expect("plan step")
    }

    struct Harness {
        executor: Arc<ScriptedExecutor>,
        probes: Arc<ScriptedProbeRunner>,
        runner: StepRunner,
    }

    fn harness(
        script: Vec<ScriptedRun>,
        probes: ScriptedProbeRunner,
        docs: MemoryInstructionSource,
    ) -> Harness {
        let executor = Arc::new(ScriptedExecutor::new(script));
        let probes = Arc::new(probes);
        let session = RunSession::new(executor.clone(), SessionPolicy::default());
        let runner = StepRunner::new(session, probes.clone(), Arc::new(docs), "runner");
        Harness {
            executor,
            probes,
            runner,
        }
    }

    fn docs() -> MemoryInstructionSource {
        MemoryInstructionSource::for_steps(&[plan_step()])
    }

    #[tokio::test]
    async fn happy_path_runs_every_phase() {
        let h = harness(vec![], ScriptedProbeRunner::new(), docs());
        let mut phases = Vec::new();

        let result = h
            .runner
            .execute_with(&plan_step(), &SharedArgs::new("add search"), |phase| {
                phases.push(phase);
            })
            .await;

        assert_eq!(result, StepResult::Done);
        assert_eq!(
            phases,
            vec![
                StepPhase::Idle,
                StepPhase::PrereqChecking,
                StepPhase::Executing,
                StepPhase::Validating,
            ]
        );
        assert_eq!(h.probes.commands().len(), 2);
        let config = &h.executor.configs()[0];
        assert_eq!(config.prompt, "add search");
        assert_eq!(config.attachments[0].name, "commands/4-speckit.plan.md");
        assert_eq!(config.params["commandPath"], "commands/4-speckit.plan.md");
    }

    #[tokio::test]
    async fn missing_document_fails_before_any_probe() {
        let step = plan_step();
        let h = harness(
            vec![],
            ScriptedProbeRunner::new(),
            docs().without(&step.instruction_path),
        );

        let result = h.runner.execute(&step, &SharedArgs::new("x")).await;
        let err = result.error().expect("error");
        assert!(matches!(result, StepResult::PrereqFailed(_)));
        assert_eq!(err.kind, FailureKind::MissingInstructionDocument);
        assert_eq!(
            err.message,
            "Instruction document missing or unreadable: commands/4-speckit.plan.md"
        );
        assert!(h.probes.commands().is_empty());
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn sentinel_document_counts_as_missing() {
        let step = plan_step();
        let h = harness(
            vec![],
            ScriptedProbeRunner::new(),
            MemoryInstructionSource::new()
                .with(&step.instruction_path, "[FILE_NOT_FOUND] no such file"),
        );
        let result = h.runner.execute(&step, &SharedArgs::new("x")).await;
        assert_eq!(
            result.error().map(|err| err.kind),
            Some(FailureKind::MissingInstructionDocument)
        );
    }

    #[tokio::test]
    async fn failed_prerequisite_skips_the_run() {
        let probes = ScriptedProbeRunner::new().with_outcome(
            "setup-plan.sh",
            ProbeOutcome::fail(1, "ERROR: Not on a feature branch"),
        );
        let h = harness(vec![], probes, docs());

        let result = h.runner.execute(&plan_step(), &SharedArgs::new("x")).await;
        let StepResult::PrereqFailed(err) = result else {
            panic!("expected prerequisite failure, got {result:?}");
        };
        assert_eq!(err.kind, FailureKind::PrerequisiteFailed);
        assert_eq!(
            err.message,
            "Prerequisite script failed for commands/4-speckit.plan.md (exit code 1)\n\n\
             ERROR: Not on a feature branch"
        );
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn reported_failure_skips_validation() {
        let h = harness(
            vec![ScriptedRun::Resolve(json!({
                "type": "structuredOutput",
                "value": {"ok": false, "error": "tests are red"},
            }))],
            ScriptedProbeRunner::new(),
            docs(),
        );

        let result = h.runner.execute(&plan_step(), &SharedArgs::new("x")).await;
        assert_eq!(
            result,
            StepResult::ExecutionFailed(StepError::new(
                FailureKind::ExecutionFailed,
                "tests are red"
            ))
        );
        assert_eq!(h.probes.commands().len(), 1, "only the prerequisite ran");
    }

    #[tokio::test]
    async fn failed_validation_reports_exit_code() {
        let probes = ScriptedProbeRunner::new()
            .with_outcome("check-prerequisites.sh --json >/dev/null", ProbeOutcome::fail(2, ""));
        let h = harness(vec![], probes, docs());

        let result = h.runner.execute(&plan_step(), &SharedArgs::new("x")).await;
        assert_eq!(
            result,
            StepResult::ValidationFailed(StepError::new(
                FailureKind::ValidationFailed,
                "Validation failed for commands/4-speckit.plan.md (exit code 2)"
            ))
        );
    }

    #[tokio::test]
    async fn transport_failure_is_an_execution_failure() {
        let h = harness(
            vec![ScriptedRun::Throw("socket closed".to_string())],
            ScriptedProbeRunner::new(),
            docs(),
        );
        let result = h.runner.execute(&plan_step(), &SharedArgs::new("x")).await;
        assert_eq!(
            result,
            StepResult::ExecutionFailed(StepError::new(FailureKind::Transport, "socket closed"))
        );
    }

    #[tokio::test]
    async fn cancelled_step_skips_prerequisite_and_run() {
        let h = harness(vec![], ScriptedProbeRunner::new(), docs());
        let args = SharedArgs::new("x");
        args.cancel.cancel();

        let result = h.runner.execute(&plan_step(), &args).await;
        assert_eq!(
            result.error().map(|err| err.kind),
            Some(FailureKind::UserCancelled)
        );
        assert!(h.probes.commands().is_empty(), "setup-plan.sh must not run");
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_execution_is_user_cancelled() {
        let h = harness(vec![ScriptedRun::Stall], ScriptedProbeRunner::new(), docs());
        let args = SharedArgs::new("x");
        let trigger = args.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = h.runner.execute(&plan_step(), &args).await;
        assert!(matches!(
            result,
            StepResult::ExecutionFailed(ref err) if err.kind == FailureKind::UserCancelled
        ));
        assert_eq!(h.probes.commands().len(), 1, "validation skipped");
    }
}
