//! System-wide configuration for cairn
//!
//! Stored at `~/.config/cairn/config.toml` (Linux/macOS) or
//! `%APPDATA%\cairn\config.toml` (Windows). `CAIRN_CONFIG` overrides the
//! location.

use anyhow::{Context, Result};
use cairn_workdir::IgnoreRules;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// System-wide cairn configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub workdir: WorkdirConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkdirConfig {
    /// Ignore patterns applied to every workdir
    pub ignore: Vec<String>,
}

impl WorkdirConfig {
    pub fn ignore_rules(&self) -> IgnoreRules {
        IgnoreRules::from(self.ignore.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address `cairn serve` listens on (default: 127.0.0.1:10001)
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:10001".to_string(),
        }
    }
}

/// Get the system config directory path
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join(".config/cairn"))
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|c| c.join("cairn"))
    }
}

/// Get the system config file path
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("CAIRN_CONFIG") {
        return Some(PathBuf::from(path));
    }
    config_dir().map(|d| d.join("config.toml"))
}

/// Load system configuration; defaults if the file doesn't exist
pub fn load() -> Result<SystemConfig> {
    match config_file_path() {
        Some(path) => load_from(&path),
        None => {
            tracing::debug!("Could not determine config directory, using defaults");
            Ok(SystemConfig::default())
        }
    }
}

pub fn load_from(config_path: &Path) -> Result<SystemConfig> {
    if !config_path.exists() {
        tracing::debug!("System config not found at {}, using defaults", config_path.display());
        return Ok(SystemConfig::default());
    }

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read system config at {}", config_path.display()))?;

    let config: SystemConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse system config at {}", config_path.display()))?;

    tracing::debug!("Loaded system config from {}", config_path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SystemConfig::default();
        assert!(config.workdir.ignore.is_empty());
        assert_eq!(config.server.bind, "127.0.0.1:10001");
    }

    #[test]
    fn test_partial_config_fills_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[workdir]\nignore = [\"*.tmp\", \"build/\"]\n")?;

        let config = load_from(&path)?;
        assert_eq!(config.server.bind, "127.0.0.1:10001");
        let rules = config.workdir.ignore_rules();
        assert!(rules.is_ignored("a/b.tmp"));
        assert!(rules.is_ignored("build/x"));
        Ok(())
    }

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = load_from(&temp_dir.path().join("absent.toml"))?;
        assert!(config.workdir.ignore.is_empty());
        Ok(())
    }

    #[test]
    fn test_malformed_file_is_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[server\nbind = ")?;
        assert!(load_from(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_config_serialization() {
        let config = SystemConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SystemConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.server.bind, parsed.server.bind);
    }
}
