//! Run executor abstraction.
//!
//! The [`RunExecutor`] trait decouples run orchestration from the backend that
//! actually streams a run (an agent subprocess in production). Tests use
//! scripted executors that resolve, fail or stall on demand.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::types::RunState;
use crate::watchdog::AttemptState;

/// Errors a run executor may throw instead of resolving.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor observed its cancellation token and unwound.
    #[error("run cancelled")]
    Cancelled,

    /// The executor could not complete the run.
    #[error("{0}")]
    Transport(String),

    #[error("executor I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Content attached to a run alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// Inputs to one run attempt. Built per send.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Agent selector.
    pub agent: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// Agent-specific parameters.
    pub params: Value,
    pub previous_state: Option<RunState>,
    /// Caller-owned cancellation signal (user cancel).
    pub cancel: CancellationToken,
}

impl RunConfig {
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            attachments: Vec::new(),
            params: Value::Null,
            previous_state: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_attachment(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.attachments.push(Attachment {
            name: name.into(),
            content: content.into(),
        });
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_previous_state(mut self, state: Option<RunState>) -> Self {
        self.previous_state = state;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Something observed while a run streams.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Text(String),
    Raw(Value),
}

pub type EventObserver = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Handle through which an executor reports stream activity for one attempt.
///
/// Every report refreshes the attempt's last-event timestamp, which is what the
/// idle watchdog measures.
#[derive(Clone)]
pub struct EventSink {
    attempt: Arc<AttemptState>,
    observer: Option<EventObserver>,
}

impl EventSink {
    pub fn new(attempt: Arc<AttemptState>, observer: Option<EventObserver>) -> Self {
        Self { attempt, observer }
    }

    pub fn emit(&self, event: RunEvent) {
        self.attempt.touch();
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// Record activity without an event payload (keep-alives, stderr chatter).
    pub fn touch(&self) {
        self.attempt.touch();
    }

    /// Exempt the attempt from idle detection while a human answer is pending.
    ///
    /// Activity is recorded again when the returned guard drops.
    pub fn awaiting_input(&self) -> AwaitingInput {
        self.attempt.begin_input_wait();
        AwaitingInput {
            attempt: Arc::clone(&self.attempt),
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("attempt", &self.attempt)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Guard returned by [`EventSink::awaiting_input`].
#[derive(Debug)]
pub struct AwaitingInput {
    attempt: Arc<AttemptState>,
}

impl Drop for AwaitingInput {
    fn drop(&mut self) {
        self.attempt.end_input_wait();
    }
}

/// Abstraction over run backends.
///
/// Implementations must observe `cancel` cooperatively: once it fires they
/// unwind on their own and return [`ExecutorError::Cancelled`] (or any error).
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn run(
        &self,
        config: &RunConfig,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<RunState, ExecutorError>;
}
