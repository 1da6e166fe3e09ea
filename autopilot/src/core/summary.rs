//! User-facing summary printed when a pipeline run ends.

use std::path::PathBuf;

use crate::core::types::RunStatus;

/// One expected artifact of a feature directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub label: String,
    /// Path relative to the project root.
    pub relative_path: PathBuf,
    pub exists: bool,
}

/// Artifacts of the most recent feature directory, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactsSummary {
    /// Feature directory relative to the project root.
    pub feature_dir: Option<PathBuf>,
    pub artifacts: Vec<Artifact>,
}

/// Inputs for [`build_summary`].
#[derive(Debug, Clone)]
pub struct SummaryInput<'a> {
    pub status: RunStatus,
    pub failed_step: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub artifacts: &'a ArtifactsSummary,
}

/// Render the multi-line summary.
pub fn build_summary(input: &SummaryInput<'_>) -> String {
    let mut lines = vec![format!("Autopilot status: {}", input.status)];
    if let Some(step) = input.failed_step {
        lines.push(format!("Failed step: {step}"));
    }
    if let Some(message) = input.error_message.filter(|m| !m.trim().is_empty()) {
        lines.push(format!("Error: {}", message.trim_end()));
    }

    let Some(feature_dir) = &input.artifacts.feature_dir else {
        lines.push("Artifacts: none found".to_string());
        return lines.join("\n");
    };

    let dir = feature_dir.display().to_string();
    lines.push(format!(
        "Feature directory: {}",
        if dir.is_empty() { "." } else { &dir }
    ));
    lines.push("Artifacts:".to_string());
    if input.artifacts.artifacts.is_empty() {
        lines.push("- none found".to_string());
        return lines.join("\n");
    }
    for artifact in &input.artifacts.artifacts {
        let suffix = if artifact.exists { "" } else { " (missing)" };
        lines.push(format!("- {}{}", artifact.relative_path.display(), suffix));
    }
    lines.join("\n")
}
