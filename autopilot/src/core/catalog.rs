//! The fixed catalog of pipeline steps and their probes.
//!
//! Every step is addressed by an instruction document under the commands
//! directory. Probes are shell snippets evaluated in the project root; exit
//! code 0 passes.

use std::path::{Path, PathBuf};

pub const SPECIFY: &str = "Specify";
pub const CLARIFY: &str = "Clarify";
pub const PLAN: &str = "Plan";
pub const TASKS: &str = "Tasks";
pub const IMPLEMENT: &str = "Implement";
pub const REVIEW: &str = "Review";

const CHECK_PREREQUISITES: &str = ".specify/scripts/bash/check-prerequisites.sh";
const SETUP_PLAN: &str = ".specify/scripts/bash/setup-plan.sh";
const CURRENT_BRANCH: &str =
    r#"BRANCH="$(git rev-parse --abbrev-ref HEAD 2>/dev/null || echo '')""#;

/// External check run before or after a step's work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Shell command (`sh -c`).
    pub command: String,
}

impl Probe {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// One named stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    pub label: String,
    /// Instruction document, relative to the project root.
    pub instruction_path: PathBuf,
    pub prerequisite: Option<Probe>,
    pub validation: Option<Probe>,
}

impl PipelineStep {
    pub fn new(label: impl Into<String>, instruction_path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            instruction_path: instruction_path.into(),
            prerequisite: None,
            validation: None,
        }
    }

    pub fn with_prerequisite(mut self, probe: Probe) -> Self {
        self.prerequisite = Some(probe);
        self
    }

    pub fn with_validation(mut self, probe: Probe) -> Self {
        self.validation = Some(probe);
        self
    }
}

/// Builds the ordered step list for a project layout.
#[derive(Debug, Clone)]
pub struct StepCatalog {
    commands_dir: PathBuf,
    specs_dir: PathBuf,
}

impl StepCatalog {
    pub fn new(commands_dir: impl Into<PathBuf>, specs_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands_dir: commands_dir.into(),
            specs_dir: specs_dir.into(),
        }
    }

    /// Ordered steps; `Specify` leads only when `include_specify` is set.
    pub fn steps(&self, include_specify: bool) -> Vec<PipelineStep> {
        let mut steps = Vec::with_capacity(6);
        if include_specify {
            steps.push(self.specify());
        }
        steps.extend(self.tail());
        steps
    }

    pub fn specify(&self) -> PipelineStep {
        let spec_file = self.spec_file_expr();
        PipelineStep::new(SPECIFY, self.document("2-speckit.specify.md")).with_validation(
            Probe::shell(format!(
                "{CURRENT_BRANCH} && test -n \"$BRANCH\" && \
                 echo \"$BRANCH\" | grep -Eq '^[0-9]{{3}}-[a-z0-9][a-z0-9-]*$' && \
                 test -f \"{spec_file}\""
            )),
        )
    }

    /// The steps that always run, in order.
    pub fn tail(&self) -> Vec<PipelineStep> {
        let spec_file = self.spec_file_expr();
        let paths_only = Probe::shell(format!("{CHECK_PREREQUISITES} --json --paths-only"));
        let require_tasks = format!("{CHECK_PREREQUISITES} --json --require-tasks --include-tasks");
        let require_tasks_quiet = Probe::shell(format!("{require_tasks} >/dev/null"));

        vec![
            PipelineStep::new(CLARIFY, self.document("3-speckit.clarify.md"))
                .with_prerequisite(paths_only.clone())
                .with_validation(Probe::shell(format!(
                    "{CURRENT_BRANCH} && test -n \"$BRANCH\" && test -f \"{spec_file}\""
                ))),
            PipelineStep::new(PLAN, self.document("4-speckit.plan.md"))
                .with_prerequisite(Probe::shell(format!("{SETUP_PLAN} --json")))
                .with_validation(Probe::shell(format!(
                    "{CHECK_PREREQUISITES} --json >/dev/null"
                ))),
            PipelineStep::new(TASKS, self.document("6-speckit.tasks.md"))
                .with_prerequisite(Probe::shell(format!("{CHECK_PREREQUISITES} --json")))
                .with_validation(require_tasks_quiet.clone()),
            PipelineStep::new(IMPLEMENT, self.document("8-speckit.implement.md"))
                .with_prerequisite(Probe::shell(require_tasks))
                .with_validation(require_tasks_quiet.clone()),
            PipelineStep::new(REVIEW, self.document("9-speckit.review.md"))
                .with_prerequisite(paths_only)
                .with_validation(require_tasks_quiet),
        ]
    }

    fn document(&self, file_name: &str) -> PathBuf {
        self.commands_dir.join(file_name)
    }

    fn spec_file_expr(&self) -> String {
        display_slash(&self.specs_dir.join("$BRANCH").join("spec.md"))
    }
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::new("commands", "specs")
    }
}

fn display_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
