//! Assertions over an installed disk: the partition table of the raw disk
//! file and the files visible under the partitions that mounted.
//!
//! Nothing here mutates state. The first violated expectation ends the test.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::fail;
use crate::utils::{pattern, Shell};

pub const IGNITION_FILE: &str = "coreos-install.json";
pub const GRUB_CONFIG: &str = "grub.cfg";
/// Kernel argument the bootloader needs to pick up the injected config
pub const GRUB_CONFIG_REFERENCE: &str = "coreos.config.url=oem:///coreos-install.json";
/// `/usr/lib/os-release`, relative to the mounted USR partition
pub const RELEASE_FILE: &str = "lib/os-release";
pub const CLOUDINIT_FILE: &str = "var/lib/coreos-install/user_data";

pub const ROOT_PARTITION: (u32, &str) = (9, "ROOT");
pub const USR_A_PARTITION: (u32, &str) = (3, "USR-A");

const PARTITION_NAME_PATTERN: &str = r"Partition name: '(?P<name>[\d\w\-_]+)'";

/// Anything but a definite "not found" counts as present; unreadable files
/// then fail loudly when read.
fn present(path: &Path) -> bool {
    !matches!(fs::metadata(path), Err(e) if e.kind() == ErrorKind::NotFound)
}

fn read(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("couldn't read {}", what))
}

#[derive(Clone)]
pub struct Validator {
    shell: Shell,
}

impl Validator {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    /// At least one mount must carry `lib/os-release`.
    pub fn release_exists(&self, mount_paths: &[PathBuf]) -> Result<()> {
        if mount_paths.iter().any(|p| present(&p.join(RELEASE_FILE))) {
            return Ok(());
        }
        fail!("/usr/lib/os-release not found on any partitions")
    }

    pub fn validate_partition_label(
        &self,
        disk_file: &Path,
        expected_label: &str,
        partition: u32,
    ) -> Result<()> {
        let disk_info = self.shell.must_run(
            "sgdisk",
            &["-i", partition.to_string().as_str(), &*disk_file.to_string_lossy()],
        )?;

        let actual_label = pattern::search("partition name", PARTITION_NAME_PATTERN, &disk_info)?;
        if actual_label != expected_label {
            fail!(
                "label on partition {} did not match. expected {}, received {}",
                partition,
                expected_label,
                actual_label
            );
        }

        debug!("Partition {} is labeled {}", partition, actual_label);
        Ok(())
    }

    pub fn validate_default_root_partition(&self, disk_file: &Path) -> Result<()> {
        let (index, label) = ROOT_PARTITION;
        self.validate_partition_label(disk_file, label, index)
    }

    pub fn validate_default_usr_a_partition(&self, disk_file: &Path) -> Result<()> {
        let (index, label) = USR_A_PARTITION;
        self.validate_partition_label(disk_file, label, index)
    }

    /// What every installer run has to produce, whatever its options.
    pub fn default_checks(&self, mount_paths: &[PathBuf], disk_file: &Path) -> Result<()> {
        self.release_exists(mount_paths)?;
        self.validate_default_root_partition(disk_file)?;
        self.validate_default_usr_a_partition(disk_file)?;
        info!("Default checks passed");
        Ok(())
    }

    /// The injected config must be present byte-for-byte and some
    /// `grub.cfg` must point the kernel at it.
    pub fn validate_ignition(&self, mount_paths: &[PathBuf], config: &str) -> Result<()> {
        let reference = regex::escape(GRUB_CONFIG_REFERENCE);
        let mut ignition_found = false;
        let mut grub_found = false;

        for mount in mount_paths {
            let ignition_path = mount.join(IGNITION_FILE);
            if present(&ignition_path) {
                ignition_found = true;
                let data = read(&ignition_path, IGNITION_FILE)?;
                if data != config.as_bytes() {
                    fail!(
                        "{} doesn't match: expected {}, received {}",
                        IGNITION_FILE,
                        config,
                        String::from_utf8_lossy(&data)
                    );
                }
            }

            let grub_path = mount.join(GRUB_CONFIG);
            if present(&grub_path) {
                let data = read(&grub_path, GRUB_CONFIG)?;
                if pattern::contains(&reference, &data)? {
                    grub_found = true;
                } else {
                    debug!("{} does not reference {}", grub_path.display(), IGNITION_FILE);
                }
            }
        }

        if !ignition_found {
            fail!("couldn't find {}", IGNITION_FILE);
        }
        if !grub_found {
            fail!("couldn't find {} with {}", GRUB_CONFIG, GRUB_CONFIG_REFERENCE);
        }
        Ok(())
    }

    pub fn validate_cloudinit(&self, mount_paths: &[PathBuf], config: &str) -> Result<()> {
        let mut cloudinit_found = false;

        for mount in mount_paths {
            let path = mount.join(CLOUDINIT_FILE);
            if !present(&path) {
                continue;
            }

            cloudinit_found = true;
            let data = read(&path, "coreos-install/user_data")?;
            if data != config.as_bytes() {
                fail!(
                    "coreos-install/user_data doesn't match: expected {}, received {}",
                    config,
                    String::from_utf8_lossy(&data)
                );
            }
        }

        if !cloudinit_found {
            fail!("couldn't find coreos-install/user_data");
        }
        Ok(())
    }
}
