//! Diagnostic tracing for autopilot runs.
//!
//! Tracing output goes to stderr and is meant for whoever is debugging a
//! stalled or failing pipeline: attempts armed and retried, watchdog aborts,
//! probe exit codes, questions routed to the human.
//!
//! Product output (streamed agent text, questions, progress lines and the run
//! summary) goes to stdout and is unaffected by `RUST_LOG` or `-v`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset, by `-v` count.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,autopilot=info",
        2 => "warn,autopilot=debug",
        _ => "autopilot=trace,debug",
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `verbosity` when set.
///
/// # Example
/// ```bash
/// RUST_LOG=autopilot::watchdog=debug autopilot run "add full-text search"
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
