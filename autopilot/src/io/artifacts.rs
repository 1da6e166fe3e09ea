//! Discovery of feature directories and their artifacts under `specs/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::branch::is_feature_branch;
use crate::core::summary::{Artifact, ArtifactsSummary};

const ARTIFACT_FILES: [&str; 6] = [
    "spec.md",
    "plan.md",
    "tasks.md",
    "research.md",
    "data-model.md",
    "quickstart.md",
];
const ARTIFACT_DIRS: [&str; 1] = ["contracts"];

/// Most recently modified feature directory (by its `spec.md` mtime).
///
/// Only directories named like feature branches and holding a `spec.md` count.
pub fn find_latest_feature_dir(specs_dir: &Path) -> Result<Option<PathBuf>> {
    if !specs_dir.is_dir() {
        return Ok(None);
    }
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    let entries =
        fs::read_dir(specs_dir).with_context(|| format!("read {}", specs_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", specs_dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !entry.path().is_dir() || !is_feature_branch(name) {
            continue;
        }
        let spec_path = entry.path().join("spec.md");
        let Ok(meta) = fs::metadata(&spec_path) else {
            continue;
        };
        let modified = meta
            .modified()
            .with_context(|| format!("mtime of {}", spec_path.display()))?;
        let newer = latest
            .as_ref()
            .is_none_or(|(current, _)| modified > *current);
        if newer {
            latest = Some((modified, entry.path()));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

/// Expected artifacts of `feature_dir`, with existence flags.
pub fn list_artifacts(root: &Path, feature_dir: &Path) -> Vec<Artifact> {
    let relative_base = relative_to(root, feature_dir);
    let files = ARTIFACT_FILES.iter().map(|file| Artifact {
        label: (*file).to_string(),
        relative_path: relative_base.join(file),
        exists: feature_dir.join(file).is_file(),
    });
    let dirs = ARTIFACT_DIRS.iter().map(|dir| Artifact {
        label: format!("{dir}/"),
        relative_path: relative_base.join(dir),
        exists: feature_dir.join(dir).is_dir(),
    });
    files.chain(dirs).collect()
}

/// Summary of the latest feature directory's artifacts.
pub fn artifacts_summary(root: &Path, specs_dir: &Path) -> Result<ArtifactsSummary> {
    let Some(feature_dir) = find_latest_feature_dir(&root.join(specs_dir))? else {
        debug!("no feature directory found");
        return Ok(ArtifactsSummary::default());
    };
    Ok(ArtifactsSummary {
        feature_dir: Some(relative_to(root, &feature_dir)),
        artifacts: list_artifacts(root, &feature_dir),
    })
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_spec(root: &Path, dir: &str, mtime: SystemTime) {
        let feature = root.join("specs").join(dir);
        fs::create_dir_all(&feature).expect("mkdir");
        let spec = feature.join("spec.md");
        fs::write(&spec, "# Spec\n").expect("write");
        let file = fs::File::options().write(true).open(&spec).expect("open");
        file.set_modified(mtime).expect("set mtime");
    }

    #[test]
    fn missing_specs_dir_yields_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(find_latest_feature_dir(&temp.path().join("specs")).expect("find"), None);
    }

    #[test]
    fn picks_most_recent_feature_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        write_spec(temp.path(), "001-old", base);
        write_spec(temp.path(), "002-new", base + Duration::from_secs(60));
        write_spec(temp.path(), "notes", base + Duration::from_secs(120));
        fs::create_dir_all(temp.path().join("specs/003-no-spec")).expect("mkdir");

        let latest = find_latest_feature_dir(&temp.path().join("specs")).expect("find");
        assert_eq!(latest, Some(temp.path().join("specs/002-new")));
    }

    #[test]
    fn summary_lists_expected_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_spec(temp.path(), "004-search", SystemTime::now());
        fs::write(temp.path().join("specs/004-search/plan.md"), "plan").expect("write");
        fs::create_dir_all(temp.path().join("specs/004-search/contracts")).expect("mkdir");

        let summary = artifacts_summary(temp.path(), Path::new("specs")).expect("summary");
        assert_eq!(summary.feature_dir, Some(PathBuf::from("specs/004-search")));
        let existing: Vec<&str> = summary
            .artifacts
            .iter()
            .filter(|a| a.exists)
            .map(|a| a.label.as_str())
            .collect();
        assert_eq!(existing, vec!["spec.md", "plan.md", "contracts/"]);
        assert_eq!(summary.artifacts.len(), 7);
    }
}
