//! Autopilot CLI.
//!
//! Runs the feature pipeline in the current project, either once for a given
//! description (`autopilot run ...`) or as a line-oriented session on stdin
//! where free text starts a run, `cancel [confirm]` stops it and, while the
//! agent waits on a question, each line answers it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

use autopilot::bridge::{PendingQuestion, PendingQuestionBridge, answer_from_text};
use autopilot::command::{CommandAction, CommandHandler, USAGE, render_summary};
use autopilot::core::command::{CommandRequest, parse_command};
use autopilot::core::types::{PipelineRunResult, StepResult};
use autopilot::exit_codes;
use autopilot::io::config::{AutopilotConfig, CONFIG_PATH, load_config, write_config};
use autopilot::io::executor::{EventObserver, RunEvent};
use autopilot::io::git::Git;
use autopilot::logging;
use autopilot::pipeline::{PipelineEvent, PipelineExecutor, SpecifyProbe};
use autopilot::step::SharedArgs;

#[derive(Parser)]
#[command(
    name = "autopilot",
    version,
    about = "Drive a feature through the specify/plan/implement pipeline"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(short = 'C', long, global = true, default_value = ".")]
    root: PathBuf,

    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.autopilot/config.toml` with default values if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the pipeline once for a feature description.
    Run {
        /// Feature description.
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
    },
    /// Read commands and answers from stdin (default).
    Interactive,
    /// Print the steps the next run would execute.
    Steps,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root;
    match cli.command.unwrap_or(Command::Interactive) {
        Command::Init { force } => cmd_init(&root, force),
        Command::Steps => cmd_steps(&root),
        Command::Run { description } => block_on(cmd_run(&root, description.join(" "))),
        Command::Interactive => block_on(cmd_interactive(&root)),
    }
}

fn block_on<F: Future<Output = Result<i32>>>(future: F) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let code = runtime.block_on(future);
    // A pending stdin read must not keep the process alive.
    runtime.shutdown_background();
    code
}

fn load(root: &Path) -> Result<AutopilotConfig> {
    load_config(&root.join(CONFIG_PATH))
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let path = root.join(CONFIG_PATH);
    if path.exists() && !force {
        println!("{} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &AutopilotConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_steps(root: &Path) -> Result<i32> {
    let config = load(root)?;
    let decision = SpecifyProbe::from_config(root, &config).evaluate(&Git::new(root));
    println!("{decision}");
    let steps = config.catalog().steps(decision.include_specify());
    for (index, step) in steps.iter().enumerate() {
        println!("{}. {} ({})", index + 1, step.label, step.instruction_path.display());
        if let Some(probe) = &step.prerequisite {
            println!("   prerequisite: {}", probe.command);
        }
        if let Some(probe) = &step.validation {
            println!("   validation: {}", probe.command);
        }
    }
    Ok(exit_codes::OK)
}

async fn cmd_run(root: &Path, description: String) -> Result<i32> {
    let config = load(root)?;
    let bridge = Arc::new(PendingQuestionBridge::new());
    let pipeline =
        PipelineExecutor::from_config(root, &config, Arc::clone(&bridge), Some(print_events()))?;
    let questions = bridge.subscribe(print_question);

    // Stdin only answers questions in this mode.
    let answers = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(active) = bridge.get_active() {
                    bridge.submit(answer_from_text(&active, &line));
                }
            }
        })
    };

    let result = pipeline.run(&SharedArgs::new(description), print_progress).await;
    answers.abort();
    questions.unsubscribe();
    Ok(finish(root, &config, &result))
}

async fn cmd_interactive(root: &Path) -> Result<i32> {
    let config = load(root)?;
    let bridge = Arc::new(PendingQuestionBridge::new());
    let pipeline = Arc::new(PipelineExecutor::from_config(
        root,
        &config,
        Arc::clone(&bridge),
        Some(print_events()),
    )?);
    let handler = CommandHandler::new();
    let questions = bridge.subscribe(print_question);
    let mut runs = JoinSet::new();

    println!("{USAGE}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let is_cancel = matches!(parse_command(&line), CommandRequest::Cancel { .. });
        if !is_cancel && let Some(active) = bridge.get_active() {
            bridge.submit(answer_from_text(&active, &line));
            continue;
        }
        match handler.handle(&line) {
            CommandAction::Reply(text) => println!("{text}"),
            CommandAction::Start(ticket) => {
                let pipeline = Arc::clone(&pipeline);
                let root = root.to_path_buf();
                let config = config.clone();
                runs.spawn(async move {
                    let args = SharedArgs::new(ticket.description.clone())
                        .with_cancel(ticket.cancel.clone());
                    let result = pipeline.run(&args, print_progress).await;
                    let code = finish(&root, &config, &result);
                    drop(ticket);
                    code
                });
            }
        }
    }

    // Stdin closed: let in-flight runs finish and report the last one.
    let mut code = exit_codes::OK;
    while let Some(joined) = runs.join_next().await {
        code = joined.context("join pipeline run")?;
    }
    questions.unsubscribe();
    Ok(code)
}

fn finish(root: &Path, config: &AutopilotConfig, result: &PipelineRunResult) -> i32 {
    println!("{}", render_summary(root, &config.paths.specs_dir, result));
    exit_codes::for_status(result.status())
}

fn print_events() -> EventObserver {
    Arc::new(|event: &RunEvent| {
        if let RunEvent::Text(text) = event {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{text}");
        }
    })
}

fn print_question(active: Option<&PendingQuestion>) {
    let Some(active) = active else {
        return;
    };
    for question in &active.questions {
        println!("? {}", question.text);
        for (index, option) in question.options.iter().enumerate() {
            println!("  {}. {}", index + 1, option.label);
        }
    }
    if active.questions.len() > 1 {
        println!("(separate answers with `;`)");
    }
}

fn print_progress(event: PipelineEvent<'_>) {
    match event {
        PipelineEvent::SpecifyDecided(decision) => println!("{decision}"),
        PipelineEvent::StepStarted { label, index, total } => {
            println!("[{}/{total}] {label}", index + 1);
        }
        PipelineEvent::StepFinished { label, result } => match result {
            StepResult::Done => println!("{label}: done"),
            StepResult::PrereqFailed(_) => println!("{label}: prerequisite failed"),
            StepResult::ExecutionFailed(_) => println!("{label}: execution failed"),
            StepResult::ValidationFailed(_) => println!("{label}: validation failed"),
        },
    }
}
