use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::utils::{pattern, Shell};

/// Size of every backing disk file. Never resized after creation.
pub const DISK_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

const DISK_FILE_PREFIX: &str = "coreos-install-disk";
const MOUNT_POINT_PREFIX: &str = "coreos-install-mount-point";
const LOOP_DEVICE_PATTERN: &str = r"(/dev/loop\d+)";
const MAPPER_PATTERN: &str = r"map (?P<device>[\w\d]+)";

/// A sparse disk file attached to a loop device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHandle {
    pub disk_file: PathBuf,
    pub loop_device: String,
}

/// Creates and tears down the block devices an installer run writes to.
///
/// Each acquisition here has a matching release; callers register the
/// release as soon as the acquisition succeeds.
#[derive(Clone)]
pub struct DeviceManager {
    shell: Shell,
    mapper_dir: PathBuf,
    /// Where disk files and mount points are created. `None` follows TMPDIR.
    temp_root: Option<PathBuf>,
}

impl DeviceManager {
    pub fn new(shell: Shell, mapper_dir: PathBuf) -> Self {
        Self {
            shell,
            mapper_dir,
            temp_root: None,
        }
    }

    pub fn with_temp_root(mut self, root: PathBuf) -> Self {
        self.temp_root = Some(root);
        self
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Create a 10 GiB sparse disk file, write an empty GPT to it and attach
    /// it to a free loop device with partition scanning enabled.
    pub fn create_device(&self) -> Result<DiskHandle> {
        let (file, disk_file) = tempfile::Builder::new()
            .prefix(DISK_FILE_PREFIX)
            .tempfile_in(self.temp_dir())
            .context("failed to create disk file")?
            .keep()
            .context("failed to persist disk file")?;

        // the handle is not returned yet, so nothing else would remove the file
        let truncated = file
            .set_len(DISK_SIZE_BYTES)
            .context("failed to truncate disk file");
        drop(file);
        let attached = truncated.and_then(|_| self.attach(&disk_file));

        match attached {
            Ok(loop_device) => {
                info!("Attached {} to {}", disk_file.display(), loop_device);
                Ok(DiskHandle {
                    disk_file,
                    loop_device,
                })
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&disk_file) {
                    warn!("couldn't remove {}: {}", disk_file.display(), rm);
                }
                Err(e)
            }
        }
    }

    fn attach(&self, disk_file: &Path) -> Result<String> {
        let disk = disk_file.to_string_lossy();

        self.shell.must_run("sgdisk", &[&*disk])?;

        let out = self
            .shell
            .must_run("losetup", &["-P", "-f", &*disk, "--show"])?;
        pattern::search("loop device path", LOOP_DEVICE_PATTERN, &out)
    }

    /// Detach the loop device, then remove the backing file.
    pub fn cleanup_disk(&self, disk: &DiskHandle) -> Result<()> {
        self.shell.must_run("losetup", &["-d", disk.loop_device.as_str()])?;

        fs::remove_file(&disk.disk_file)
            .with_context(|| format!("couldn't remove {}", disk.disk_file.display()))?;
        debug!("Released {}", disk.loop_device);
        Ok(())
    }

    /// Add device-mapper nodes for every partition on the loop device and
    /// return their paths in the order kpartx reported them.
    pub fn create_device_mappers(&self, loop_device: &str) -> Result<Vec<PathBuf>> {
        let out = self.shell.must_run("kpartx", &["-avs", loop_device])?;
        debug!("kpartx out: {}", String::from_utf8_lossy(&out).trim_end());

        let names = pattern::search_all("loop device", MAPPER_PATTERN, &out)?;
        Ok(names
            .into_iter()
            .map(|name| self.mapper_dir.join(name))
            .collect())
    }

    /// Remove every mapper node of the loop device. All mounts on top of
    /// them must already be gone.
    pub fn remove_device_mappers(&self, loop_device: &str) -> Result<()> {
        self.shell.must_run("kpartx", &["-d", loop_device])?;
        Ok(())
    }

    /// Mount `device` read-only on a fresh directory.
    ///
    /// `None` means the partition carries nothing mountable. The directory
    /// created for the attempt is left behind in that case; only a returned
    /// mount point is the caller's to unmount and remove.
    pub fn mount_device_mapper(&self, device: &Path) -> Result<Option<PathBuf>> {
        let dir = tempfile::Builder::new()
            .prefix(MOUNT_POINT_PREFIX)
            .tempdir_in(self.temp_dir())
            .context("couldn't create mount point directory")?
            .into_path();

        let device = device.to_string_lossy();
        let target = dir.to_string_lossy();
        if !self
            .shell
            .run("mount", &[&*device, &*target, "-o", "ro"])
        {
            debug!("{} has no mountable filesystem", device);
            return Ok(None);
        }

        debug!("Mounted {} on {}", device, target);
        Ok(Some(dir))
    }

    pub fn unmount_path(&self, path: &Path) -> Result<()> {
        self.shell.must_run("umount", &[&*path.to_string_lossy()])?;
        Ok(())
    }
}
