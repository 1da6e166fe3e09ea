//! Agent subprocess speaking a JSON-lines run protocol.
//!
//! The executor writes one `run` request to the agent's stdin, then reads
//! stdout line by line:
//!
//! - `{"type":"text","text":...}` is streamed as [`RunEvent::Text`].
//! - `{"type":"ask_user","id":...,"questions":[...]}` is routed through the
//!   [`PendingQuestionBridge`]; the answer is written back as
//!   `{"type":"answer","id":...,"response":...}`.
//! - `{"type":"result","output":...,"session_id"?:...}` carries the final state.
//!
//! Any other JSON line is forwarded as [`RunEvent::Raw`], and non-JSON lines as
//! text. Stderr lines count as activity and the last few are kept for errors.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bridge::PendingQuestionBridge;
use crate::core::types::{Question, RunState};
use crate::io::config::AgentConfig;
use crate::io::executor::{
    Attachment, EventSink, ExecutorError, RunConfig, RunEvent, RunExecutor,
};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Run {
        agent: &'a str,
        prompt: &'a str,
        attachments: &'a [Attachment],
        params: &'a Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<&'a str>,
    },
    Answer {
        id: &'a str,
        response: &'a Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Text {
        text: String,
    },
    AskUser {
        id: String,
        questions: Vec<Question>,
    },
    Result {
        #[serde(default)]
        output: Value,
        #[serde(default)]
        session_id: Option<String>,
    },
}

/// One classified stdout line.
#[derive(Debug, PartialEq)]
enum Line {
    Blank,
    Event(RunEvent),
    Ask { id: String, questions: Vec<Question> },
    Result(RunState),
}

fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Line::Blank;
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Line::Event(RunEvent::Text(trimmed.to_string()));
    };
    match Inbound::deserialize(&value) {
        Ok(Inbound::Text { text }) => Line::Event(RunEvent::Text(text)),
        Ok(Inbound::AskUser { id, questions }) => Line::Ask { id, questions },
        Ok(Inbound::Result { output, session_id }) => Line::Result(RunState { session_id, output }),
        Err(_) => Line::Event(RunEvent::Raw(value)),
    }
}

/// [`RunExecutor`] backed by an agent subprocess.
#[derive(Debug, Clone)]
pub struct AgentCommandExecutor {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    bridge: Arc<PendingQuestionBridge>,
}

impl AgentCommandExecutor {
    pub fn new(
        config: &AgentConfig,
        workdir: impl Into<PathBuf>,
        bridge: Arc<PendingQuestionBridge>,
    ) -> Result<Self, ExecutorError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| ExecutorError::Transport("agent command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: workdir.into(),
            bridge,
        })
    }

    async fn ask(
        &self,
        id: &str,
        questions: Vec<Question>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Value, ExecutorError> {
        let _waiting = events.awaiting_input();
        let answer = self.bridge.request(id, questions);
        tokio::select! {
            _ = cancel.cancelled() => {
                self.bridge.withdraw(id);
                Err(ExecutorError::Cancelled)
            }
            answer = answer => answer.map_err(|err| ExecutorError::Transport(err.to_string())),
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, message: &Outbound<'_>) -> Result<(), ExecutorError> {
    let mut buf = serde_json::to_string(message)
        .map_err(|err| ExecutorError::Transport(format!("encode agent message: {err}")))?;
    buf.push('\n');
    stdin.write_all(buf.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

async fn terminate(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!(error = %err, "agent already exited");
    }
}

#[async_trait]
impl RunExecutor for AgentCommandExecutor {
    #[instrument(skip_all, fields(program = %self.program, agent = %config.agent))]
    async fn run(
        &self,
        config: &RunConfig,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<RunState, ExecutorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        info!(pid = ?child.id(), "agent spawned");

        let missing =
            |stream: &str| ExecutorError::Transport(format!("agent {stream} unavailable"));
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = {
            let tail = Arc::clone(&stderr_tail);
            let events = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    events.touch();
                    debug!(stderr = %line, "agent stderr");
                    let mut kept = tail.lock();
                    if kept.len() == STDERR_TAIL_LINES {
                        kept.pop_front();
                    }
                    kept.push_back(line);
                }
            })
        };

        let request = Outbound::Run {
            agent: &config.agent,
            prompt: &config.prompt,
            attachments: &config.attachments,
            params: &config.params,
            session_id: config
                .previous_state
                .as_ref()
                .and_then(|state| state.session_id.as_deref()),
        };
        write_line(&mut stdin, &request).await?;

        let mut stdout = BufReader::new(stdout).lines();
        let mut final_state = None;
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cancellation observed; stopping agent");
                    terminate(&mut child).await;
                    return Err(ExecutorError::Cancelled);
                }
                line = stdout.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            match parse_line(&line) {
                Line::Blank => events.touch(),
                Line::Event(event) => events.emit(event),
                Line::Ask { id, questions } => {
                    events.touch();
                    info!(id = %id, count = questions.len(), "agent asked for input");
                    let response = match self.ask(&id, questions, &events, &cancel).await {
                        Ok(response) => response,
                        Err(err) => {
                            terminate(&mut child).await;
                            return Err(err);
                        }
                    };
                    write_line(&mut stdin, &Outbound::Answer { id: &id, response: &response })
                        .await?;
                }
                Line::Result(state) => {
                    events.touch();
                    final_state = Some(state);
                }
            }
        }
        drop(stdin);

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(ExecutorError::Cancelled);
            }
            status = child.wait() => status?,
        };
        if let Err(err) = stderr_task.await {
            warn!(error = %err, "stderr reader failed");
        }
        debug!(code = ?status.code(), "agent exited");

        if let Some(state) = final_state {
            return Ok(state);
        }
        if status.success() {
            return Ok(RunState::with_output(json!({"type": "lastMessage"})));
        }
        let code = status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let tail: Vec<String> = stderr_tail.lock().iter().cloned().collect();
        let mut message = format!("agent exited with code {code}");
        if !tail.is_empty() {
            message.push_str(": ");
            message.push_str(&tail.join("\n"));
        }
        Err(ExecutorError::Transport(message))
    }
}
