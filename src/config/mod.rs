use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod validation;

/// Host-specific knobs for a harness run. Every field has a default, so an
/// empty JSON object is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Installer binary, resolved through PATH
    pub installer: String,
    /// Parent of the per-test TMPDIR when none is supplied
    pub scratch_base: PathBuf,
    pub mapper_dir: PathBuf,
    pub release: ReleaseConfig,
    /// Address the local image server binds to
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Image host suffix; URLs look like `https://{channel}.{domain}/...`
    pub domain: String,
    pub os_release: PathBuf,
    pub update_conf: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            installer: "coreos-install".to_string(),
            scratch_base: PathBuf::from("/var/tmp"),
            mapper_dir: PathBuf::from("/dev/mapper"),
            release: ReleaseConfig::default(),
            listen_addr: "127.0.0.1:0".to_string(),
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            domain: "release.core-os.net".to_string(),
            os_release: PathBuf::from("/usr/lib/os-release"),
            update_conf: PathBuf::from("/etc/coreos/update.conf"),
        }
    }
}

impl HarnessConfig {
    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_json(&contents)
            .with_context(|| format!("Invalid configuration in file: {}", path.display()))?;

        debug!("Successfully loaded config: {:#?}", config);
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: HarnessConfig =
            serde_json::from_str(contents).context("Failed to parse JSON configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config_structure(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = HarnessConfig::from_json("{}").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.installer, "coreos-install");
        assert_eq!(config.release.os_release, PathBuf::from("/usr/lib/os-release"));
    }

    #[test]
    fn test_partial_override() {
        let config = HarnessConfig::from_json(
            r#"{"installer": "/opt/bin/coreos-install", "release": {"domain": "release.example.org"}}"#,
        )
        .unwrap();
        assert_eq!(config.installer, "/opt/bin/coreos-install");
        assert_eq!(config.release.domain, "release.example.org");
        assert_eq!(config.release.update_conf, PathBuf::from("/etc/coreos/update.conf"));
        assert_eq!(config.mapper_dir, PathBuf::from("/dev/mapper"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.json");
        fs::write(&path, r#"{"scratch_base": "/srv/scratch"}"#).unwrap();

        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.scratch_base, PathBuf::from("/srv/scratch"));

        assert!(HarnessConfig::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(HarnessConfig::from_json("{installer: }").is_err());
    }
}
