//! Idle watchdog for a streaming run attempt.
//!
//! The watchdog ticks on a fixed interval alongside the in-flight attempt and
//! compares the attempt's last-event timestamp against an idle threshold. When
//! the attempt has been silent for at least the threshold it records a watchdog
//! abort on the attempt and invokes its callback, once.
//!
//! All timestamps use `tokio::time::Instant` so paused-clock tests drive the
//! watchdog deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::io::config::IdleConfig;

/// Idle threshold after which a silent attempt is aborted.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(120);
/// Interval between staleness checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why an attempt was aborted. Set at most once per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    User,
    Watchdog,
}

/// Mutable state of one run attempt, shared with its watchdog and event sink.
#[derive(Debug)]
pub struct AttemptState {
    retry_count: u32,
    armed_at: Instant,
    last_event_at: Mutex<Option<Instant>>,
    abort: Mutex<Option<AbortCause>>,
    input_waits: AtomicUsize,
}

impl AttemptState {
    pub fn new(retry_count: u32) -> Self {
        Self {
            retry_count,
            armed_at: Instant::now(),
            last_event_at: Mutex::new(None),
            abort: Mutex::new(None),
            input_waits: AtomicUsize::new(0),
        }
    }

    /// Watchdog retries that preceded this attempt.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    /// Record stream activity now.
    pub fn touch(&self) {
        *self.last_event_at.lock() = Some(Instant::now());
    }

    pub fn last_event_at(&self) -> Option<Instant> {
        *self.last_event_at.lock()
    }

    /// Record the abort cause unless one is already set.
    ///
    /// Returns `true` when this call set it; user and watchdog aborts are
    /// mutually exclusive within an attempt.
    pub fn record_abort(&self, cause: AbortCause) -> bool {
        let mut abort = self.abort.lock();
        if abort.is_some() {
            return false;
        }
        *abort = Some(cause);
        true
    }

    pub fn abort_cause(&self) -> Option<AbortCause> {
        *self.abort.lock()
    }

    pub fn aborted_by_user(&self) -> bool {
        self.abort_cause() == Some(AbortCause::User)
    }

    pub fn aborted_by_watchdog(&self) -> bool {
        self.abort_cause() == Some(AbortCause::Watchdog)
    }

    pub fn is_awaiting_input(&self) -> bool {
        self.input_waits.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn begin_input_wait(&self) {
        self.input_waits.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_input_wait(&self) {
        self.touch();
        self.input_waits.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Timing parameters of the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogPolicy {
    pub poll_interval: Duration,
    pub idle_threshold: Duration,
    /// When set, an attempt with no events yet is measured from arming instead
    /// of being exempt.
    pub guard_first_event: bool,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            idle_threshold: IDLE_THRESHOLD,
            guard_first_event: true,
        }
    }
}

impl From<&IdleConfig> for WatchdogPolicy {
    fn from(config: &IdleConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            idle_threshold: config.threshold(),
            guard_first_event: config.guard_first_event,
        }
    }
}

/// One staleness check. Returns the idle duration when the watchdog fires.
fn check(
    attempt: &AttemptState,
    policy: &WatchdogPolicy,
    user_cancel: &CancellationToken,
    now: Instant,
) -> Option<Duration> {
    if attempt.abort_cause().is_some() {
        return None;
    }
    if user_cancel.is_cancelled() {
        attempt.record_abort(AbortCause::User);
        return None;
    }
    if attempt.is_awaiting_input() {
        return None;
    }
    let since = match attempt.last_event_at() {
        Some(at) => at,
        None if policy.guard_first_event => attempt.armed_at(),
        None => return None,
    };
    let idle = now.saturating_duration_since(since);
    if idle < policy.idle_threshold {
        return None;
    }
    attempt.record_abort(AbortCause::Watchdog).then_some(idle)
}

/// Periodic background check bound to one attempt.
///
/// Stopped by [`IdleWatchdog::disarm`] or on drop, so every exit path of the
/// owning attempt stops the recurring work.
#[derive(Debug)]
pub struct IdleWatchdog {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IdleWatchdog {
    /// Start checking `attempt`. `on_idle` runs at most once, after the abort
    /// has been recorded on the attempt.
    pub fn arm<F>(
        policy: WatchdogPolicy,
        attempt: Arc<AttemptState>,
        user_cancel: CancellationToken,
        on_idle: F,
    ) -> Self
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        let stop = CancellationToken::new();
        let stop_task = stop.clone();
        let handle = tokio::spawn(async move {
            let period = policy.poll_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut on_idle = Some(on_idle);

            loop {
                tokio::select! {
                    _ = stop_task.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let Some(idle) = check(&attempt, &policy, &user_cancel, now) else {
                            continue;
                        };
                        warn!(
                            idle_ms = idle.as_millis() as u64,
                            retry_count = attempt.retry_count(),
                            "run idle watchdog triggered; aborting attempt"
                        );
                        if let Some(callback) = on_idle.take() {
                            callback(idle);
                        }
                        break;
                    }
                }
            }
            debug!("idle watchdog stopped");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the periodic check.
    pub fn disarm(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        self.halt();
    }
}
