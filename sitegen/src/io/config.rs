//! Configuration stored under `.sitegen/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::template::Stack;

/// Default location of the config file, relative to the project directory.
pub const CONFIG_PATH: &str = ".sitegen/config.toml";

/// Default location of the project record, relative to the project directory.
pub const PROJECT_PATH: &str = ".sitegen/project.json";

/// Sitegen configuration (TOML).
///
/// Missing fields default to values that work for a local checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SitegenConfig {
    /// Stack used when the classification answer is not recognised.
    pub default_stack: Stack,

    pub generator: GeneratorConfig,

    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Chat adapter command. Receives `{"messages": [...]}` on stdin, answers on stdout.
    pub command: Vec<String>,

    /// Wall-clock budget per generator call in seconds.
    pub timeout_secs: u64,

    /// Truncate generator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Forward response lines as they arrive.
    pub stream: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["sitegen-chat".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory the local sandbox mounts the project into.
    pub root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".sitegen/sandbox"),
        }
    }
}

impl Default for SitegenConfig {
    fn default() -> Self {
        Self {
            default_stack: Stack::NextJs,
            generator: GeneratorConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl SitegenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.sandbox.root.as_os_str().is_empty() {
            return Err(anyhow!("sandbox.root must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SitegenConfig::default()`.
pub fn load_config(path: &Path) -> Result<SitegenConfig> {
    if !path.exists() {
        let cfg = SitegenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SitegenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SitegenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
