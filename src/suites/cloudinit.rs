use anyhow::Result;

use super::{mount_partitions, prepare_disk, stage_file};
use crate::core::{TestCase, TestContext};

pub const CLOUDINIT_TEST_NAME: &str = "Install with a cloud-config";

pub const CLOUD_CONFIG: &str = "#cloud-config

hostname: coreos-install-test
";

pub fn tests() -> Vec<TestCase> {
    vec![TestCase::new(CLOUDINIT_TEST_NAME, cloudinit_test)]
}

fn cloudinit_test(ctx: &TestContext) -> Result<()> {
    let disk = prepare_disk(ctx)?;
    let cloud_config = stage_file(ctx, CLOUD_CONFIG)?;

    ctx.run_installer(&[
        "-d".to_string(),
        disk.loop_device.clone(),
        "-c".to_string(),
        cloud_config.to_string_lossy().into_owned(),
    ])?;

    let mount_paths = mount_partitions(ctx, &disk)?;

    ctx.default_checks(&mount_paths, &disk.disk_file)?;
    ctx.validate_cloudinit(&mount_paths, CLOUD_CONFIG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites::simulated;

    #[test]
    fn test_cloudinit_test_on_simulated_host() {
        let (ctx, host) = simulated::context(CLOUDINIT_TEST_NAME);

        cloudinit_test(&ctx).unwrap();
        ctx.run_cleanups();
        assert!(ctx.errors().is_empty(), "{:?}", ctx.errors());

        let host = host.lock().unwrap();
        assert_eq!(host.installed.len(), 1);
        assert_eq!(host.installed[0].0, "-c");
        assert_eq!(host.installed[0].1, CLOUD_CONFIG.as_bytes());
        assert_eq!(host.calls.last().unwrap(), "losetup -d");

        for dir in &host.unmountable {
            std::fs::remove_dir(dir).unwrap();
        }
    }

    #[test]
    fn test_ignition_is_not_written_for_cloud_config() {
        let (ctx, host) = simulated::context(CLOUDINIT_TEST_NAME);

        cloudinit_test(&ctx).unwrap();
        // re-mount to inspect what the installer left behind
        let disk = prepare_disk(&ctx).unwrap();
        let mounts = mount_partitions(&ctx, &disk).unwrap();
        let err = ctx.validate_ignition(&mounts, "{}").unwrap_err();
        assert!(err.to_string().contains("couldn't find coreos-install.json"));

        ctx.run_cleanups();
        assert!(ctx.errors().is_empty(), "{:?}", ctx.errors());

        let host = host.lock().unwrap();
        for dir in &host.unmountable {
            std::fs::remove_dir(dir).unwrap();
        }
    }
}
