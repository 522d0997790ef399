//! Installer test suites.
//!
//! Each module hands its test cases to [`registry`]; nothing registers
//! itself behind the caller's back.

use anyhow::Result;
use std::path::PathBuf;

use crate::core::{DiskHandle, Registry, TestContext};

pub mod cloudinit;
pub mod offline;
pub mod positive;

/// All suites, in the order they run.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.extend(positive::tests());
    registry.extend(cloudinit::tests());
    registry.extend(offline::tests());
    registry
}

/// Create a disk and schedule its release.
pub(crate) fn prepare_disk(ctx: &TestContext) -> Result<DiskHandle> {
    let disk = ctx.create_device()?;
    let release = disk.clone();
    ctx.defer(format!("cleanup disk {}", disk.loop_device), move |ctx| {
        ctx.cleanup_disk(&release)
    });
    Ok(disk)
}

/// Write `data` to a temp file that is removed when the test ends.
pub(crate) fn stage_file(ctx: &TestContext, data: &str) -> Result<PathBuf> {
    let path = ctx.write_file(data)?;
    let release = path.clone();
    ctx.defer(format!("remove {}", path.display()), move |ctx| {
        ctx.remove_all(&release);
        Ok(())
    });
    Ok(path)
}

/// Expose every partition of `disk` and mount the ones carrying a
/// filesystem. Only mounts that succeeded get an unmount scheduled.
pub(crate) fn mount_partitions(ctx: &TestContext, disk: &DiskHandle) -> Result<Vec<PathBuf>> {
    let devices = ctx.create_device_mappers(&disk.loop_device)?;
    let loop_device = disk.loop_device.clone();
    ctx.defer(format!("remove mappers of {}", loop_device), move |ctx| {
        ctx.remove_device_mappers(&loop_device)
    });

    let mut mount_paths = Vec::new();
    for device in &devices {
        let Some(path) = ctx.mount_device_mapper(device)? else {
            continue;
        };

        let dir = path.clone();
        ctx.defer(format!("remove {}", dir.display()), move |ctx| {
            ctx.remove_all(&dir);
            Ok(())
        });
        let mount = path.clone();
        ctx.defer(format!("unmount {}", mount.display()), move |ctx| {
            ctx.unmount_path(&mount)
        });

        mount_paths.push(path);
    }

    Ok(mount_paths)
}
