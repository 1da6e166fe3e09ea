//! Shared deterministic types for the run orchestrator and the step pipeline.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Terminal status of one logical send (after all retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported by the run executor when a run resolves.
///
/// Opaque to the orchestrator apart from `output`, which is inspected to
/// classify the outcome. A previous state may be fed back into the next send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Executor output, usually `{ "type": ..., "message"?: ... }`.
    #[serde(default)]
    pub output: Value,
}

impl RunState {
    pub fn with_output(output: Value) -> Self {
        Self {
            session_id: None,
            output,
        }
    }

    /// `output.type`, when present.
    pub fn output_type(&self) -> Option<&str> {
        self.output.get("type").and_then(Value::as_str)
    }

    /// True when the executor reported an explicit error-shaped output.
    pub fn is_error(&self) -> bool {
        self.output_type() == Some("error")
    }

    /// `output.message`, when it is a string.
    pub fn message(&self) -> Option<&str> {
        self.output.get("message").and_then(Value::as_str)
    }
}

/// Terminal result of a logical send.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state: Option<RunState>,
    pub error_message: Option<String>,
    /// Why the send did not succeed; `None` on success.
    pub failure: Option<FailureKind>,
    /// Number of attempts made, including transparent retries.
    pub attempts: u32,
}

impl RunOutcome {
    pub fn success(state: RunState, attempts: u32) -> Self {
        Self {
            status: RunStatus::Success,
            state: Some(state),
            error_message: None,
            failure: None,
            attempts,
        }
    }

    pub fn failed(
        kind: FailureKind,
        state: Option<RunState>,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            status: RunStatus::Failed,
            state,
            error_message: Some(message.into()),
            failure: Some(kind),
            attempts,
        }
    }

    pub fn cancelled(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: RunStatus::Cancelled,
            state: None,
            error_message: Some(message.into()),
            failure: Some(FailureKind::UserCancelled),
            attempts,
        }
    }
}

/// Error taxonomy shared by the session, steps and the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserCancelled,
    WatchdogIdleTimeout,
    MissingInstructionDocument,
    PrerequisiteFailed,
    ExecutionFailed,
    ValidationFailed,
    Transport,
}

/// Terminal failure of a step, with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    pub kind: FailureKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Phase of a step's state machine, used for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    PrereqChecking,
    Executing,
    Validating,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepPhase::Idle => "idle",
            StepPhase::PrereqChecking => "prereq_checking",
            StepPhase::Executing => "executing",
            StepPhase::Validating => "validating",
        };
        f.write_str(name)
    }
}

/// Terminal state of one pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Done,
    PrereqFailed(StepError),
    ExecutionFailed(StepError),
    ValidationFailed(StepError),
}

impl StepResult {
    pub fn is_done(&self) -> bool {
        matches!(self, StepResult::Done)
    }

    pub fn error(&self) -> Option<&StepError> {
        match self {
            StepResult::Done => None,
            StepResult::PrereqFailed(err)
            | StepResult::ExecutionFailed(err)
            | StepResult::ValidationFailed(err) => Some(err),
        }
    }
}

/// Outcome of a whole pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRunResult {
    pub ok: bool,
    pub failed_step: Option<String>,
    pub error: Option<StepError>,
    /// Labels of the steps that were attempted, in order.
    pub steps_attempted: Vec<String>,
}

impl PipelineRunResult {
    pub fn status(&self) -> RunStatus {
        if self.ok {
            return RunStatus::Success;
        }
        match self.error.as_ref().map(|err| err.kind) {
            Some(FailureKind::UserCancelled) => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }
}

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
}

/// One prompt to the human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "question")]
    pub text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default, alias = "multiSelect")]
    pub allow_multiple: bool,
}

/// Answer delivered to a pending question request.
pub type QuestionResponse = Value;
