use anyhow::{anyhow, Result};
use log::debug;
use std::net::SocketAddr;
use thiserror::Error;

use super::HarnessConfig;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value: {0}")]
    InvalidValue(String),
}

/// Validate the structure of a configuration
pub fn validate_config_structure(config: &HarnessConfig) -> Result<()> {
    debug!("Validating configuration structure");

    if config.installer.trim().is_empty() {
        return Err(anyhow!(ValidationError::MissingField("installer".to_string())));
    }

    if config.release.domain.trim().is_empty() {
        return Err(anyhow!(ValidationError::MissingField("release.domain".to_string())));
    }
    if config.release.domain.contains('/') {
        return Err(anyhow!(ValidationError::InvalidValue(format!(
            "release.domain must be a host name, got {}",
            config.release.domain
        ))));
    }

    if !config.scratch_base.is_absolute() {
        return Err(anyhow!(ValidationError::InvalidValue(format!(
            "scratch_base must be absolute: {}",
            config.scratch_base.display()
        ))));
    }
    if !config.mapper_dir.is_absolute() {
        return Err(anyhow!(ValidationError::InvalidValue(format!(
            "mapper_dir must be absolute: {}",
            config.mapper_dir.display()
        ))));
    }

    if config.listen_addr.parse::<SocketAddr>().is_err() {
        return Err(anyhow!(ValidationError::InvalidValue(format!(
            "listen_addr is not a socket address: {}",
            config.listen_addr
        ))));
    }

    Ok(())
}
