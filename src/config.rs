//! User configuration (`config.toml`) and backend selection

use anyhow::{Context, Result};
use compose::{Backend, MemoryBackend, Visibility};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::local::LocalBackend;
use crate::paths;

// ============================================================================
// Backend Selection
// ============================================================================

/// Backends the CLI knows how to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process; everything is gone when the command exits
    Memory,
    /// Records kept in a JSON file under the state directory
    #[default]
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Local => "local",
        }
    }

    /// Build the backend
    pub fn connect(&self, state_dir: &Path) -> Result<Box<dyn Backend>> {
        log::debug!("Connecting to {} backend", self);
        match self {
            BackendKind::Memory => Ok(Box::new(MemoryBackend::new())),
            BackendKind::Local => {
                let backend = LocalBackend::open(state_dir.join("machines.json"))
                    .context("Failed to open local backend")?;
                Ok(Box::new(backend))
            }
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = compose::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "local" => Ok(BackendKind::Local),
            _ => Err(compose::Error::UnknownBackend(s.to_string())),
        }
    }
}

// ============================================================================
// Config File
// ============================================================================

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend used when `--backend` is not given
    pub backend: BackendKind,
    /// Default parallelism for `up` (1 = sequential)
    pub jobs: usize,
    /// Keep finished actions visible in progress output
    pub keep_completed: bool,
    /// Where the local backend keeps its records
    pub state_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            jobs: 1,
            keep_completed: true,
            state_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, or defaults if there is no file
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolved state directory
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::state_dir(),
        }
    }

    pub fn visibility(&self) -> Visibility {
        if self.keep_completed {
            Visibility::Retain
        } else {
            Visibility::Clear
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
