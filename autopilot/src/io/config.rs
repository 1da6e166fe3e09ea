//! Autopilot configuration stored under `.autopilot/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::catalog::StepCatalog;

/// Location of the config file relative to the project root.
pub const CONFIG_PATH: &str = ".autopilot/config.toml";

/// Autopilot configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values the
/// orchestrator was tuned with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutopilotConfig {
    pub idle: IdleConfig,
    pub probe: ProbeConfig,
    pub agent: AgentConfig,
    pub paths: PathsConfig,
}

/// Idle watchdog and retry policy for one logical send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdleConfig {
    /// Silence after which an attempt is considered stalled.
    pub threshold_secs: u64,
    /// How often the watchdog checks for staleness.
    pub poll_interval_ms: u64,
    /// Transparent retries allowed after watchdog aborts.
    pub max_retries: u32,
    /// Apply the threshold (measured from arming) before the first event.
    pub guard_first_event: bool,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 120,
            poll_interval_ms: 1_000,
            max_retries: 1,
            guard_first_event: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Wall-clock budget per probe; exceeding it fails the probe.
    pub timeout_secs: u64,
    /// Truncate captured probe stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Leading stderr lines kept as diagnostic text.
    pub diagnostic_lines: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            output_limit_bytes: 100_000,
            diagnostic_lines: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent subprocess speaking the JSON-lines run protocol.
    pub command: Vec<String>,
    /// Agent selector used for pipeline steps.
    pub step_agent: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--json".to_string(),
                "-".to_string(),
            ],
            step_agent: "speckit-command-runner".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub commands_dir: PathBuf,
    pub specs_dir: PathBuf,
    pub spec_template: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            commands_dir: PathBuf::from("commands"),
            specs_dir: PathBuf::from("specs"),
            spec_template: PathBuf::from(".specify/templates/spec-template.md"),
        }
    }
}

impl IdleConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AutopilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.idle.threshold_secs == 0 {
            return Err(anyhow!("idle.threshold_secs must be > 0"));
        }
        if self.idle.poll_interval_ms == 0 {
            return Err(anyhow!("idle.poll_interval_ms must be > 0"));
        }
        if self.probe.timeout_secs == 0 {
            return Err(anyhow!("probe.timeout_secs must be > 0"));
        }
        if self.probe.output_limit_bytes == 0 {
            return Err(anyhow!("probe.output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.step_agent.trim().is_empty() {
            return Err(anyhow!("agent.step_agent must not be empty"));
        }
        Ok(())
    }

    pub fn catalog(&self) -> StepCatalog {
        StepCatalog::new(self.paths.commands_dir.clone(), self.paths.specs_dir.clone())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutopilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutopilotConfig> {
    if !path.exists() {
        let cfg = AutopilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutopilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutopilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AutopilotConfig::default());
        assert_eq!(cfg.idle.threshold(), Duration::from_secs(120));
        assert_eq!(cfg.idle.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.idle.max_retries, 1);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".autopilot/config.toml");
        let mut cfg = AutopilotConfig::default();
        cfg.idle.threshold_secs = 30;
        cfg.agent.command = vec!["my-agent".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[idle]\nmax_retries = 3\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.idle.max_retries, 3);
        assert_eq!(cfg.idle.threshold_secs, 120);
        assert_eq!(cfg.paths, PathsConfig::default());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[idle]\nthreshold_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("threshold_secs"));
    }

    #[test]
    fn empty_agent_command_is_rejected() {
        let mut cfg = AutopilotConfig::default();
        cfg.agent.command.clear();
        assert!(cfg.validate().is_err());
    }
}
