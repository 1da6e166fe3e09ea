//! Instruction documents addressed by path.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Prefix that legacy file-reading tools put in front of an error text instead of content.
pub const READ_FAILURE_SENTINEL: &str = "[FILE_";

/// Source of step instruction documents.
pub trait InstructionSource: Send + Sync {
    /// Return the document text. Errors when it is missing or unreadable.
    fn read(&self, path: &Path) -> Result<String>;
}

/// Reads documents from disk, relative to a project root.
#[derive(Debug, Clone)]
pub struct FileInstructionSource {
    root: PathBuf,
}

impl FileInstructionSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl InstructionSource for FileInstructionSource {
    fn read(&self, path: &Path) -> Result<String> {
        let full = self.root.join(path);
        debug!(path = %full.display(), "reading instruction document");
        let contents =
            fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))?;
        checked_document(path, contents)
    }
}

/// Reject empty documents and sentinel-prefixed read failures.
pub fn checked_document(path: &Path, contents: String) -> Result<String> {
    if contents.starts_with(READ_FAILURE_SENTINEL) {
        return Err(anyhow!(
            "read failure reported for {}: {}",
            path.display(),
            contents.lines().next().unwrap_or_default()
        ));
    }
    if contents.trim().is_empty() {
        return Err(anyhow!("{} is empty", path.display()));
    }
    Ok(contents)
}
