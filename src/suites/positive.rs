use anyhow::Result;

use super::{mount_partitions, prepare_disk, stage_file};
use crate::core::{TestCase, TestContext};

pub const BASE_TEST_NAME: &str = "Does this thing work?";

pub const IGNITION_CONFIG: &str = r#"{
		"ignition": {
			"version": "2.1.0"
		}
	}"#;

pub fn tests() -> Vec<TestCase> {
    vec![TestCase::new(BASE_TEST_NAME, base_test)]
}

/// Default install with an Ignition config injected.
fn base_test(ctx: &TestContext) -> Result<()> {
    let disk = prepare_disk(ctx)?;
    let ignition = stage_file(ctx, IGNITION_CONFIG)?;

    let opts = vec![
        "-d".to_string(),
        disk.loop_device.clone(),
        "-i".to_string(),
        ignition.to_string_lossy().into_owned(),
    ];
    ctx.run_installer(&opts)?;

    let mount_paths = mount_partitions(ctx, &disk)?;

    ctx.default_checks(&mount_paths, &disk.disk_file)?;
    ctx.validate_ignition(&mount_paths, IGNITION_CONFIG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites::simulated;

    #[test]
    fn test_base_test_on_simulated_host() {
        let (ctx, host) = simulated::context(BASE_TEST_NAME);

        base_test(&ctx).unwrap();
        ctx.run_cleanups();
        assert!(ctx.errors().is_empty(), "{:?}", ctx.errors());

        let host = host.lock().unwrap();
        let programs: Vec<&str> = host
            .calls
            .iter()
            .map(|c| c.split(' ').next().unwrap())
            .collect();
        assert_eq!(
            programs,
            vec![
                "sgdisk",
                "losetup",
                "coreos-install",
                "kpartx",
                "mount",
                "mount",
                "mount",
                "mount",
                "sgdisk",
                "sgdisk",
                "umount",
                "umount",
                "umount",
                "kpartx",
                "losetup",
            ]
        );
        assert_eq!(host.calls.last().unwrap(), "losetup -d");
        assert_eq!(host.installed[0].1, IGNITION_CONFIG.as_bytes());

        for dir in &host.unmountable {
            std::fs::remove_dir(dir).unwrap();
        }
    }

    #[test]
    fn test_cleanup_after_failed_validation() {
        let (ctx, host) = simulated::context(BASE_TEST_NAME);

        // validation against a config the installer never saw
        let disk = prepare_disk(&ctx).unwrap();
        let mounts = mount_partitions(&ctx, &disk).unwrap();
        assert!(ctx.validate_ignition(&mounts, IGNITION_CONFIG).is_err());

        ctx.run_cleanups();
        assert!(ctx.errors().is_empty(), "{:?}", ctx.errors());
        assert!(!disk.disk_file.exists());
        assert!(mounts.iter().all(|m| !m.exists()));

        let host = host.lock().unwrap();
        assert_eq!(host.calls.last().unwrap(), "losetup -d");
        for dir in &host.unmountable {
            std::fs::remove_dir(dir).unwrap();
        }
    }
}
