//! Read-only git queries used to decide whether `Specify` must run.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

/// `git` invoked in a fixed working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Name of the checked-out branch. A detached HEAD has none.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let branch = self.stdout(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if branch == "HEAD" {
            bail!("HEAD is detached");
        }
        debug!(%branch, "current branch");
        Ok(branch)
    }

    /// Trimmed stdout of a successful `git <args>`.
    fn stdout(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn current_branch_follows_checkout() {
        let repo = TestRepo::new().expect("repo");
        repo.checkout("003-my-feature").expect("checkout");
        let branch = Git::new(repo.path()).current_branch().expect("branch");
        assert_eq!(branch, "003-my-feature");
    }

    #[test]
    fn detached_head_has_no_branch() {
        let repo = TestRepo::new().expect("repo");
        let status = Command::new("git")
            .args(["checkout", "--detach"])
            .current_dir(repo.path())
            .status()
            .expect("spawn git");
        assert!(status.success());

        let err = Git::new(repo.path()).current_branch().unwrap_err();
        assert!(err.to_string().contains("detached"));
    }

    #[test]
    fn current_branch_errors_outside_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Git::new(temp.path()).current_branch().unwrap_err();
        assert!(err.to_string().contains("git rev-parse"));
    }
}
