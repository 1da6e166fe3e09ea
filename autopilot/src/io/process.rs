//! Blocking execution of probe processes with a deadline and bounded capture.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream, plus how many were discarded.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: u64,
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// What a finished (or killed) probe process left behind.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CapturedOutput {
    /// Exit code, `None` when killed by a signal or on timeout.
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            return None;
        }
        self.status.code()
    }

    /// First `max_lines` non-blank lines of stderr (stdout when stderr is empty).
    ///
    /// Truncated capture and timeouts are noted after the lines.
    pub fn diagnostic(&self, max_lines: usize) -> String {
        let (name, stream) = if self.stderr.bytes.iter().all(u8::is_ascii_whitespace) {
            ("stdout", &self.stdout)
        } else {
            ("stderr", &self.stderr)
        };
        let text = stream.text();
        let mut lines: Vec<String> = text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .take(max_lines)
            .map(str::to_string)
            .collect();
        if stream.dropped > 0 {
            lines.push(format!("[{name} truncated by {} bytes]", stream.dropped));
        }
        if self.timed_out {
            lines.push("[probe timed out]".to_string());
        }
        lines.join("\n")
    }
}

/// Run `cmd` to completion or until `timeout`, keeping at most `limit` bytes
/// of each output stream.
///
/// Both pipes are drained on scoped threads while the child runs, so a chatty
/// probe cannot block on a full pipe.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, limit = limit))]
pub fn run_captured(mut cmd: Command, timeout: Duration, limit: usize) -> Result<CapturedOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn probe")?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("probe stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("probe stderr not piped"))?;

    thread::scope(|scope| {
        let stdout = scope.spawn(move || drain(stdout, limit));
        let stderr = scope.spawn(move || drain(stderr, limit));
        let (status, timed_out) = wait_or_kill(&mut child, timeout)?;

        let output = CapturedOutput {
            status,
            stdout: join_reader(stdout)?,
            stderr: join_reader(stderr)?,
            timed_out,
        };
        debug!(exit_code = ?output.status.code(), timed_out, "probe process finished");
        Ok(output)
    })
}

fn join_reader(handle: thread::ScopedJoinHandle<'_, io::Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("probe output reader panicked"))?
        .context("read probe output")
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    let waited = child.wait_timeout(timeout);
    match waited {
        Ok(Some(status)) => Ok((status, false)),
        Ok(None) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "probe timed out; killing it");
            child.kill().context("kill timed-out probe")?;
            let status = child.wait().context("reap timed-out probe")?;
            Ok((status, true))
        }
        Err(err) => {
            // Readers only finish once the pipes close.
            let _ = child.kill();
            Err(err).context("wait for probe")
        }
    }
}

/// Keep the first `limit` bytes of `reader`, count and discard the rest.
fn drain<R: Read>(mut reader: R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut bytes)?;
    let dropped = io::copy(&mut reader, &mut io::sink())?;
    Ok(Captured { bytes, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn run(script: &str, limit: usize) -> CapturedOutput {
        run_captured(sh(script), Duration::from_secs(5), limit).expect("run")
    }

    #[test]
    fn captures_exit_code_and_stderr() {
        let out = run("echo out; echo first >&2; echo second >&2; exit 3", 1_000);
        assert_eq!(out.exit_code(), Some(3));
        assert_eq!(out.diagnostic(1), "first");
        assert_eq!(out.diagnostic(5), "first\nsecond");
    }

    #[test]
    fn diagnostic_falls_back_to_stdout() {
        let out = run("echo only-stdout; exit 1", 1_000);
        assert_eq!(out.diagnostic(3), "only-stdout");
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_captured(sh("exec sleep 5"), Duration::from_millis(100), 1_000)
            .expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_code(), None);
        assert!(out.diagnostic(3).contains("timed out"));
    }

    #[test]
    fn truncation_is_reported_in_diagnostic() {
        let out = run("printf 'abcdefghij' >&2; exit 1", 4);
        assert_eq!(
            out.stderr,
            Captured {
                bytes: b"abcd".to_vec(),
                dropped: 6,
            }
        );
        assert_eq!(out.diagnostic(5), "abcd\n[stderr truncated by 6 bytes]");
    }
}
