//! Command surface: start a pipeline run, or cancel the active one.
//!
//! At most one run is active per [`CommandHandler`]. Cancellation needs an
//! explicit confirmation and only signals the run; the summary is produced by
//! whoever awaits the run once it unwinds.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::command::{CommandRequest, parse_command};
use crate::core::summary::{SummaryInput, build_summary};
use crate::core::types::PipelineRunResult;
use crate::io::artifacts::artifacts_summary;

pub const USAGE: &str = "Usage: autopilot <feature description>";
pub const NOTHING_TO_CANCEL: &str = "No active run to cancel.";
pub const CONFIRM_CANCEL: &str = "Confirm cancellation by running `cancel confirm`.";
pub const CANCEL_REQUESTED: &str =
    "Cancellation requested. Summary will be shown when the run ends.";
pub const RUN_IN_PROGRESS: &str =
    "Another run is in progress. Please wait before starting a new one.";

/// Result of handling one command.
#[derive(Debug)]
pub enum CommandAction {
    /// Show this text; nothing else happens.
    Reply(&'static str),
    /// Start a pipeline run with this ticket.
    Start(RunTicket),
}

/// The run currently holding the slot.
#[derive(Debug)]
struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    /// Cancel confirmed; the run still holds the slot until it has unwound.
    unwinding: bool,
}

type ActiveSlot = Arc<Mutex<Option<ActiveRun>>>;

/// Permission to run one pipeline; releases the active slot on drop.
#[derive(Debug)]
pub struct RunTicket {
    pub description: String,
    pub cancel: CancellationToken,
    id: u64,
    slot: ActiveSlot,
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|run| run.id == self.id) {
            *slot = None;
            debug!(run = self.id, "active run released");
        }
    }
}

/// Tracks the active run and answers start/cancel commands.
#[derive(Debug, Default)]
pub struct CommandHandler {
    active: ActiveSlot,
    next_id: AtomicU64,
}

impl CommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True from start until the run's ticket is dropped, cancelled or not.
    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// True once cancel was confirmed for a run that has not released its slot.
    pub fn is_unwinding(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|run| run.unwinding)
    }

    pub fn handle(&self, input: &str) -> CommandAction {
        match parse_command(input) {
            CommandRequest::Usage => CommandAction::Reply(USAGE),
            CommandRequest::Cancel { confirmed } => CommandAction::Reply(self.cancel(confirmed)),
            CommandRequest::Start(description) => self.start(description),
        }
    }

    fn start(&self, description: String) -> CommandAction {
        let mut active = self.active.lock();
        if let Some(run) = active.as_ref() {
            warn!(run = run.id, unwinding = run.unwinding, "run requested while another is active");
            return CommandAction::Reply(RUN_IN_PROGRESS);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *active = Some(ActiveRun {
            id,
            cancel: cancel.clone(),
            unwinding: false,
        });
        info!(run = id, "run started");
        CommandAction::Start(RunTicket {
            description,
            cancel,
            id,
            slot: Arc::clone(&self.active),
        })
    }

    fn cancel(&self, confirmed: bool) -> &'static str {
        let mut active = self.active.lock();
        let Some(run) = active.as_mut().filter(|run| !run.unwinding) else {
            return NOTHING_TO_CANCEL;
        };
        if !confirmed {
            return CONFIRM_CANCEL;
        }
        info!(run = run.id, "cancellation requested");
        run.cancel.cancel();
        run.unwinding = true;
        CANCEL_REQUESTED
    }
}

/// Summary shown when a run ends, including the latest feature's artifacts.
pub fn render_summary(root: &Path, specs_dir: &Path, result: &PipelineRunResult) -> String {
    let artifacts = artifacts_summary(root, specs_dir).unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "artifact discovery failed");
        Default::default()
    });
    build_summary(&SummaryInput {
        status: result.status(),
        failed_step: result.failed_step.as_deref(),
        error_message: result.error.as_ref().map(|err| err.message.as_str()),
        artifacts: &artifacts,
    })
}
