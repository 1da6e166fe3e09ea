//! CLI tests for `autopilot run` and `autopilot steps`.
//!
//! Spawns the autopilot binary in a scratch repository whose agent is a small
//! shell script speaking the JSON-lines protocol, and verifies exit codes and
//! the printed summary.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use autopilot::exit_codes;
use autopilot::io::config::{AutopilotConfig, CONFIG_PATH, write_config};
use autopilot::test_support::TestRepo;

const AGENT_OK: &str = r#"read req
echo '{"type":"text","text":"agent working"}'
echo '{"type":"result","output":{"type":"lastMessage"}}'"#;

const AGENT_REPORTS_FAILURE: &str = r#"read req
echo '{"type":"result","output":{"type":"structuredOutput","value":{"ok":false,"error":"could not write plan"}}}'"#;

fn write_script(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
}

/// Project with instruction documents, passing probe scripts and `agent`.
fn project(agent: &str) -> TestRepo {
    let repo = TestRepo::new().expect("repo");
    let root = repo.path();
    for doc in [
        "2-speckit.specify.md",
        "3-speckit.clarify.md",
        "4-speckit.plan.md",
        "6-speckit.tasks.md",
        "8-speckit.implement.md",
        "9-speckit.review.md",
    ] {
        repo.write(format!("commands/{doc}"), "# Instructions\n")
            .expect("doc");
    }
    write_script(root, ".specify/scripts/bash/check-prerequisites.sh", "exit 0");
    write_script(root, ".specify/scripts/bash/setup-plan.sh", "exit 0");

    let mut config = AutopilotConfig::default();
    config.agent.command = vec!["sh".to_string(), "-c".to_string(), agent.to_string()];
    write_config(&root.join(CONFIG_PATH), &config).expect("config");
    repo
}

fn autopilot(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autopilot"))
        .current_dir(root)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("spawn autopilot")
}

#[test]
fn run_on_feature_branch_completes() {
    let repo = project(AGENT_OK);
    repo.write("specs/001-search/spec.md", "# Search\n").expect("spec");
    repo.checkout("001-search").expect("checkout");

    let output = autopilot(repo.path(), &["run", "add", "search"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{stdout}");
    assert!(stdout.contains("skipping Specify"), "{stdout}");
    assert!(stdout.contains("agent working"), "{stdout}");
    assert!(stdout.contains("Autopilot status: success"), "{stdout}");
    assert!(stdout.contains("Feature directory: specs/001-search"), "{stdout}");
}

#[test]
fn specify_validation_fails_off_feature_branch() {
    let repo = project(AGENT_OK);

    let output = autopilot(repo.path(), &["run", "add search"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED), "{stdout}");
    assert!(stdout.contains("Autopilot status: failed"), "{stdout}");
    assert!(stdout.contains("Failed step: Specify"), "{stdout}");
    assert!(
        stdout.contains("Validation failed for commands/2-speckit.specify.md"),
        "{stdout}"
    );
    assert!(stdout.contains("Artifacts: none found"), "{stdout}");
}

#[test]
fn reported_failure_stops_at_first_step() {
    let repo = project(AGENT_REPORTS_FAILURE);
    repo.write("specs/001-search/spec.md", "# Search\n").expect("spec");
    repo.checkout("001-search").expect("checkout");

    let output = autopilot(repo.path(), &["run", "add search"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED), "{stdout}");
    assert!(stdout.contains("Failed step: Clarify"), "{stdout}");
    assert!(stdout.contains("Error: could not write plan"), "{stdout}");
}

#[test]
fn missing_document_fails_before_the_agent_runs() {
    let repo = project("echo should-not-run >&2; exit 7");
    repo.write("specs/001-search/spec.md", "# Search\n").expect("spec");
    repo.checkout("001-search").expect("checkout");
    fs::remove_file(repo.path().join("commands/3-speckit.clarify.md")).expect("remove doc");

    let output = autopilot(repo.path(), &["run", "add search"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED), "{stdout}");
    assert!(
        stdout.contains(
            "Error: Instruction document missing or unreadable: commands/3-speckit.clarify.md"
        ),
        "{stdout}"
    );
}

#[test]
fn steps_lists_specify_off_feature_branch() {
    let repo = project(AGENT_OK);

    let output = autopilot(repo.path(), &["steps"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout.contains("running Specify"), "{stdout}");
    assert!(stdout.contains("1. Specify (commands/2-speckit.specify.md)"), "{stdout}");
    assert!(stdout.contains("6. Review (commands/9-speckit.review.md)"), "{stdout}");
}

#[test]
fn interactive_cancel_without_run_reports_nothing_to_cancel() {
    let repo = project(AGENT_OK);
    let mut child = Command::new(env!("CARGO_BIN_EXE_autopilot"))
        .current_dir(repo.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn autopilot");
    {
        use std::io::Write;
        let mut stdin = child.stdin.take().expect("stdin");
        writeln!(stdin, "cancel confirm").expect("write");
        writeln!(stdin, "   ").expect("write");
    }
    let output = child.wait_with_output().expect("wait");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout.contains("No active run to cancel."), "{stdout}");
    assert!(stdout.contains("Usage: autopilot <feature description>"), "{stdout}");
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = autopilot(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let written = fs::read_to_string(temp.path().join(CONFIG_PATH)).expect("config");
    assert!(written.contains("threshold_secs = 120"));

    fs::write(temp.path().join(CONFIG_PATH), "[idle]\nmax_retries = 4\n").expect("edit");
    let output = autopilot(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let kept = fs::read_to_string(temp.path().join(CONFIG_PATH)).expect("config");
    assert!(kept.contains("max_retries = 4"));
}
