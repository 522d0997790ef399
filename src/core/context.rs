use anyhow::{Context, Result};
use std::cell::RefCell;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use super::cleanup::CleanupStack;
use super::device::{DeviceManager, DiskHandle};
use super::validate::Validator;
use crate::config::HarnessConfig;
use crate::utils::Shell;

const WRITE_FILE_PREFIX: &str = "coreos-install-file";

/// Handle given to every test procedure.
///
/// Wraps the command adapter, device lifecycle and validation helpers, and
/// keeps the per-test cleanup stack and the list of non-fatal errors.
pub struct TestContext {
    name: String,
    config: HarnessConfig,
    shell: Shell,
    devices: DeviceManager,
    validator: Validator,
    cleanups: RefCell<CleanupStack<TestContext>>,
    errors: RefCell<Vec<String>>,
}

impl TestContext {
    pub fn new(name: impl Into<String>, config: HarnessConfig, shell: Shell) -> Self {
        let devices = DeviceManager::new(shell.clone(), config.mapper_dir.clone());
        let validator = Validator::new(shell.clone());
        Self {
            name: name.into(),
            config,
            shell,
            devices,
            validator,
            cleanups: RefCell::new(CleanupStack::new()),
            errors: RefCell::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Register a release action. Actions run in reverse registration order
    /// once the procedure returns, whether it passed or not.
    pub fn defer<F>(&self, label: impl Into<String>, action: F)
    where
        F: FnOnce(&TestContext) -> Result<()> + 'static,
    {
        self.cleanups.borrow_mut().push(label, action);
    }

    /// Run all registered release actions. Failures become non-fatal errors.
    pub fn run_cleanups(&self) {
        let stack = std::mem::take(&mut *self.cleanups.borrow_mut());
        for failure in stack.unwind(self) {
            self.errors.borrow_mut().push(failure.to_string());
        }
    }

    /// Record a failure that does not stop the test.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("[{}] {}", self.name, message);
        self.errors.borrow_mut().push(message);
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    pub fn create_device(&self) -> Result<DiskHandle> {
        self.devices.create_device()
    }

    pub fn cleanup_disk(&self, disk: &DiskHandle) -> Result<()> {
        self.devices.cleanup_disk(disk)
    }

    pub fn create_device_mappers(&self, loop_device: &str) -> Result<Vec<PathBuf>> {
        self.devices.create_device_mappers(loop_device)
    }

    pub fn remove_device_mappers(&self, loop_device: &str) -> Result<()> {
        self.devices.remove_device_mappers(loop_device)
    }

    pub fn mount_device_mapper(&self, device: &Path) -> Result<Option<PathBuf>> {
        self.devices.mount_device_mapper(device)
    }

    pub fn unmount_path(&self, path: &Path) -> Result<()> {
        self.devices.unmount_path(path)
    }

    /// Run the installer; a non-zero exit fails the test.
    pub fn run_installer<S: AsRef<str>>(&self, opts: &[S]) -> Result<Vec<u8>> {
        self.shell.must_run(&self.config.installer, opts)
    }

    /// Directory holding the installer binary on PATH, if any.
    pub fn which_installer(&self) -> Option<PathBuf> {
        let out = self
            .shell
            .must_run("which", &[self.config.installer.as_str()])
            .ok()?;
        let found = PathBuf::from(String::from_utf8_lossy(&out).trim());
        found.parent().map(Path::to_path_buf)
    }

    /// Write `data` to a fresh temp file and return its path. The file is
    /// not removed automatically.
    pub fn write_file(&self, data: &str) -> Result<PathBuf> {
        let (file, path) = tempfile::Builder::new()
            .prefix(WRITE_FILE_PREFIX)
            .tempfile()
            .context("failed creating tmp file")?
            .keep()
            .context("failed creating tmp file")?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(data.as_bytes())
            .and_then(|_| writer.flush())
            .context("writing to tmp file failed")?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(path)
    }

    /// Remove a file or directory tree. Failure is recorded, not fatal.
    pub fn remove_all(&self, path: &Path) {
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.error(format!("couldn't remove {}: {}", path.display(), e));
        }
    }

    pub fn release_exists(&self, mount_paths: &[PathBuf]) -> Result<()> {
        self.validator.release_exists(mount_paths)
    }

    pub fn validate_partition_label(
        &self,
        disk_file: &Path,
        expected_label: &str,
        partition: u32,
    ) -> Result<()> {
        self.validator
            .validate_partition_label(disk_file, expected_label, partition)
    }

    pub fn validate_default_root_partition(&self, disk_file: &Path) -> Result<()> {
        self.validator.validate_default_root_partition(disk_file)
    }

    pub fn validate_default_usr_a_partition(&self, disk_file: &Path) -> Result<()> {
        self.validator.validate_default_usr_a_partition(disk_file)
    }

    pub fn default_checks(&self, mount_paths: &[PathBuf], disk_file: &Path) -> Result<()> {
        self.validator.default_checks(mount_paths, disk_file)
    }

    pub fn validate_ignition(&self, mount_paths: &[PathBuf], config: &str) -> Result<()> {
        self.validator.validate_ignition(mount_paths, config)
    }

    pub fn validate_cloudinit(&self, mount_paths: &[PathBuf], config: &str) -> Result<()> {
        self.validator.validate_cloudinit(mount_paths, config)
    }
}
