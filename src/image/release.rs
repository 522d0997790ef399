use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use tracing::debug;

use crate::config::ReleaseConfig;
use crate::utils::pattern;

const ID_PATTERN: &str = r#"(?m)^ID=['"]?([A-Za-z0-9 ._\-]*)['"]?"#;
const VERSION_PATTERN: &str = r#"(?m)^VERSION_ID=['"]?([A-Za-z0-9 ._\-]*)['"]?"#;
const BOARD_PATTERN: &str = r#"(?m)^COREOS_BOARD=['"]?([A-Za-z0-9 ._\-]*)['"]?"#;
const CHANNEL_PATTERN: &str = r#"(?m)^GROUP=['"]?([A-Za-z0-9 ._\-]*)['"]?"#;

const DISTRIBUTION_ID: &str = "coreos";

/// Which published image to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseTarget {
    pub channel: String,
    pub board: String,
    pub version: String,
}

impl Default for ReleaseTarget {
    fn default() -> Self {
        Self {
            channel: "stable".to_string(),
            board: "amd64-usr".to_string(),
            version: "current".to_string(),
        }
    }
}

impl fmt::Display for ReleaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.channel, self.board, self.version)
    }
}

/// Use the host's own channel, board and version when the host runs the
/// distribution, and `stable/amd64-usr/current` otherwise.
pub fn resolve_default_channel_board_version(config: &ReleaseConfig) -> Result<ReleaseTarget> {
    let os_release = match fs::read(&config.os_release) {
        Ok(data) => data,
        Err(e) => {
            debug!("{}: {}, using defaults", config.os_release.display(), e);
            return Ok(ReleaseTarget::default());
        }
    };

    match pattern::try_search(ID_PATTERN, &os_release)? {
        Some(id) if id == DISTRIBUTION_ID => {}
        other => {
            debug!("host ID is {:?}, using defaults", other);
            return Ok(ReleaseTarget::default());
        }
    }

    let version = pattern::search("version", VERSION_PATTERN, &os_release)?;
    let board = pattern::search("board", BOARD_PATTERN, &os_release)?;

    let update_conf = fs::read(&config.update_conf)
        .with_context(|| format!("reading {}", config.update_conf.display()))?;
    let channel = pattern::search("channel", CHANNEL_PATTERN, &update_conf)?;

    Ok(ReleaseTarget {
        channel,
        board,
        version,
    })
}
