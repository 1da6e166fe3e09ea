//! One logical send: run attempts under an idle watchdog with transparent retry.
//!
//! Each attempt gets a fresh [`AttemptState`], its own cancellation token (a
//! child of the caller's token) and its own [`IdleWatchdog`]. A watchdog abort
//! is retried with the same inputs up to the configured retry limit; retries
//! are invisible to the caller apart from [`RunOutcome::attempts`].

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::core::types::{FailureKind, RunOutcome, RunState};
use crate::io::config::IdleConfig;
use crate::io::executor::{EventObserver, EventSink, ExecutorError, RunConfig, RunExecutor};
use crate::watchdog::{AbortCause, AttemptState, IdleWatchdog, WatchdogPolicy};

/// Transparent retries after a watchdog abort.
pub const MAX_IDLE_RETRIES: u32 = 1;

/// Watchdog timing plus the retry limit for one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub watchdog: WatchdogPolicy,
    pub max_idle_retries: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            watchdog: WatchdogPolicy::default(),
            max_idle_retries: MAX_IDLE_RETRIES,
        }
    }
}

impl From<&IdleConfig> for SessionPolicy {
    fn from(config: &IdleConfig) -> Self {
        Self {
            watchdog: WatchdogPolicy::from(config),
            max_idle_retries: config.max_retries,
        }
    }
}

/// Drives a [`RunExecutor`] for one logical send at a time.
#[derive(Clone)]
pub struct RunSession {
    executor: Arc<dyn RunExecutor>,
    policy: SessionPolicy,
    observer: Option<EventObserver>,
}

impl std::fmt::Debug for RunSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSession")
            .field("policy", &self.policy)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl RunSession {
    pub fn new(executor: Arc<dyn RunExecutor>, policy: SessionPolicy) -> Self {
        Self {
            executor,
            policy,
            observer: None,
        }
    }

    /// Forward stream events of every attempt to `observer`.
    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run `config` to a terminal outcome.
    ///
    /// Cancelling `config.cancel` aborts the in-flight attempt and yields
    /// [`RunStatus::Cancelled`](crate::core::types::RunStatus::Cancelled)
    /// unless the executor still resolves normally.
    #[instrument(skip_all, fields(agent = %config.agent))]
    pub async fn run(&self, config: &RunConfig) -> RunOutcome {
        let mut retry_count = 0;
        loop {
            let attempts = retry_count + 1;
            let attempt = Arc::new(AttemptState::new(retry_count));
            let attempt_cancel = config.cancel.child_token();

            let watchdog = {
                let attempt_cancel = attempt_cancel.clone();
                IdleWatchdog::arm(
                    self.policy.watchdog,
                    Arc::clone(&attempt),
                    config.cancel.clone(),
                    move |_| attempt_cancel.cancel(),
                )
            };
            let events = EventSink::new(Arc::clone(&attempt), self.observer.clone());

            info!(attempt = attempts, "run attempt started");
            let result = self.executor.run(config, events, attempt_cancel).await;
            watchdog.disarm();

            let err = match result {
                Ok(state) => return resolved(state, attempts),
                Err(err) => err,
            };

            // A user cancel wins even when the watchdog aborted the attempt first.
            let user_cancelled = config.cancel.is_cancelled();
            if user_cancelled {
                attempt.record_abort(AbortCause::User);
            }
            if !user_cancelled
                && attempt.aborted_by_watchdog()
                && retry_count < self.policy.max_idle_retries
            {
                retry_count += 1;
                warn!(
                    retry = retry_count,
                    max_retries = self.policy.max_idle_retries,
                    "attempt stalled; retrying with the same inputs"
                );
                continue;
            }
            return rejected(&attempt, user_cancelled, &err, attempts, self.policy);
        }
    }
}

fn resolved(state: RunState, attempts: u32) -> RunOutcome {
    if state.is_error() {
        let message = state.message().unwrap_or("Run failed.").to_string();
        warn!(%message, attempts, "run resolved with error output");
        return RunOutcome::failed(FailureKind::ExecutionFailed, Some(state), message, attempts);
    }
    debug!(attempts, output_type = ?state.output_type(), "run resolved");
    RunOutcome::success(state, attempts)
}

fn rejected(
    attempt: &AttemptState,
    user_cancelled: bool,
    err: &ExecutorError,
    attempts: u32,
    policy: SessionPolicy,
) -> RunOutcome {
    if user_cancelled || attempt.aborted_by_user() {
        info!(attempts, "run cancelled by user");
        return RunOutcome::cancelled("Run cancelled by user.", attempts);
    }
    if attempt.aborted_by_watchdog() {
        let message = format!(
            "Run stalled: no activity for {}s (gave up after {attempts} attempts).",
            policy.watchdog.idle_threshold.as_secs()
        );
        warn!(attempts, "run abandoned after repeated idle timeouts");
        return RunOutcome::failed(FailureKind::WatchdogIdleTimeout, None, message, attempts);
    }
    warn!(error = %err, attempts, "run failed");
    RunOutcome::failed(FailureKind::Transport, None, err.to_string(), attempts)
}
