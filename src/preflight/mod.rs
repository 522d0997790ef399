//! Host checks performed before any test touches a loop device.

use thiserror::Error;
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::utils::Shell;

/// Tools every suite shells out to, besides the installer itself.
pub const REQUIRED_TOOLS: &[&str] = &["sgdisk", "losetup", "kpartx", "mount", "umount"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreflightError {
    #[error("the harness must run as root (loop devices and mounts need it)")]
    NotRoot,

    #[error("required tools not found on PATH: {}", .0.join(", "))]
    MissingTools(Vec<String>),
}

pub struct Preflight {
    shell: Shell,
    installer: String,
}

impl Preflight {
    pub fn new(shell: Shell, config: &HarnessConfig) -> Self {
        Self {
            shell,
            installer: config.installer.clone(),
        }
    }

    pub fn check(&self) -> Result<(), PreflightError> {
        check_root()?;
        self.check_tools()?;
        info!("Preflight checks passed");
        Ok(())
    }

    /// Every missing tool is reported, not just the first.
    pub fn check_tools(&self) -> Result<(), PreflightError> {
        let missing: Vec<String> = REQUIRED_TOOLS
            .iter()
            .copied()
            .chain(std::iter::once(self.installer.as_str()))
            .filter(|tool| {
                let found = self.shell.run("which", &[*tool]);
                debug!("{}: {}", tool, if found { "found" } else { "missing" });
                !found
            })
            .map(str::to_string)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PreflightError::MissingTools(missing))
        }
    }
}

#[cfg(unix)]
pub fn check_root() -> Result<(), PreflightError> {
    if nix::unistd::Uid::effective().is_root() {
        Ok(())
    } else {
        Err(PreflightError::NotRoot)
    }
}

#[cfg(not(unix))]
pub fn check_root() -> Result<(), PreflightError> {
    Err(PreflightError::NotRoot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::exec::{CommandOutput, MockExecutor};
    use std::sync::Arc;

    fn preflight(absent: &'static [&'static str]) -> Preflight {
        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .withf(|program, args| program == "which" && args.len() == 1)
            .returning(move |_, args| {
                let found = !absent.contains(&args[0].as_str());
                Ok(CommandOutput {
                    success: found,
                    code: Some(if found { 0 } else { 1 }),
                    output: Vec::new(),
                })
            });
        Preflight::new(Shell::new(Arc::new(mock)), &HarnessConfig::default())
    }

    #[test]
    fn test_all_tools_present() {
        assert_eq!(preflight(&[]).check_tools(), Ok(()));
    }

    #[test]
    fn test_reports_every_missing_tool() {
        let err = preflight(&["kpartx", "coreos-install"])
            .check_tools()
            .unwrap_err();
        assert_eq!(
            err,
            PreflightError::MissingTools(vec!["kpartx".to_string(), "coreos-install".to_string()])
        );
        assert_eq!(
            err.to_string(),
            "required tools not found on PATH: kpartx, coreos-install"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_root_check_matches_effective_uid() {
        let is_root = nix::unistd::Uid::effective().is_root();
        assert_eq!(check_root().is_ok(), is_root);
    }
}
