//! Centralized path resolution for kcompose
//!
//! # Environment Variables
//!
//! - `KCOMPOSE_CONFIG_DIR` - Override config directory
//! - `KCOMPOSE_STATE_DIR` - Override state directory (local backend records)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `KCOMPOSE_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/kcompose` (if set)
//! 3. Platform default: `~/.config/kcompose`, or `%APPDATA%\kcompose` on Windows
//!
//! For state_dir():
//! 1. `KCOMPOSE_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/kcompose` (if set)
//! 3. Platform default: `~/.local/state/kcompose`, or `%LOCALAPPDATA%\kcompose` on Windows

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "KCOMPOSE_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KCOMPOSE_STATE_DIR";

const APP: &str = "kcompose";

/// Inputs to a directory lookup, split out so resolution can be tested
/// without touching the process environment
struct Lookup {
    override_dir: Option<String>,
    xdg_dir: Option<String>,
    platform_dir: Option<PathBuf>,
    home: Option<PathBuf>,
}

impl Lookup {
    fn resolve(self, home_suffix: &[&str]) -> Result<PathBuf> {
        if let Some(dir) = self.override_dir {
            return Ok(expand(&dir));
        }
        if let Some(xdg) = self.xdg_dir {
            return Ok(PathBuf::from(xdg).join(APP));
        }
        if let Some(dir) = self.platform_dir {
            return Ok(dir.join(APP));
        }
        let mut path = self.home.context("Could not determine home directory")?;
        for part in home_suffix {
            path.push(part);
        }
        path.push(APP);
        Ok(path)
    }
}

fn platform_dir(dir: Option<PathBuf>) -> Option<PathBuf> {
    if cfg!(windows) { dir } else { None }
}

/// Get the kcompose config directory path
pub fn config_dir() -> Result<PathBuf> {
    let path = Lookup {
        override_dir: std::env::var(ENV_CONFIG_DIR).ok(),
        xdg_dir: std::env::var("XDG_CONFIG_HOME").ok(),
        platform_dir: platform_dir(dirs::config_dir()),
        home: dirs::home_dir(),
    }
    .resolve(&[".config"])?;
    log::debug!("Using config dir: {}", path.display());
    Ok(path)
}

/// Get the kcompose state directory path
pub fn state_dir() -> Result<PathBuf> {
    let path = Lookup {
        override_dir: std::env::var(ENV_STATE_DIR).ok(),
        xdg_dir: std::env::var("XDG_STATE_HOME").ok(),
        platform_dir: platform_dir(dirs::data_local_dir()),
        home: dirs::home_dir(),
    }
    .resolve(&[".local", "state"])?;
    log::debug!("Using state dir: {}", path.display());
    Ok(path)
}

/// Path of the optional config file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> Lookup {
        Lookup {
            override_dir: None,
            xdg_dir: None,
            platform_dir: None,
            home: Some(PathBuf::from("/home/dev")),
        }
    }

    #[test]
    fn test_override_wins() {
        let result = Lookup {
            override_dir: Some("/custom/config".into()),
            xdg_dir: Some("/xdg".into()),
            ..lookup()
        }
        .resolve(&[".config"])
        .unwrap();
        assert_eq!(result, PathBuf::from("/custom/config"));
    }

    #[test]
    fn test_xdg_dir() {
        let result = Lookup {
            xdg_dir: Some("/tmp/xdg-state".into()),
            ..lookup()
        }
        .resolve(&[".local", "state"])
        .unwrap();
        assert_eq!(result, PathBuf::from("/tmp/xdg-state/kcompose"));
    }

    #[test]
    fn test_home_default() {
        let result = lookup().resolve(&[".local", "state"]).unwrap();
        assert_eq!(result, PathBuf::from("/home/dev/.local/state/kcompose"));
    }

    #[test]
    fn test_no_home_is_an_error() {
        let result = Lookup {
            home: None,
            ..lookup()
        }
        .resolve(&[".config"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/test/path");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("test").join("path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }
}
