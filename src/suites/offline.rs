use anyhow::Result;
use std::path::Path;
use tracing::info;

use super::positive::IGNITION_CONFIG;
use super::{mount_partitions, prepare_disk, stage_file};
use crate::core::{TestCase, TestContext};
use crate::image::fetch::scratch_dir;
use crate::image::{HttpServer, ImageFetcher};

pub const OFFLINE_TEST_NAME: &str = "Install from a local image server";

pub fn tests() -> Vec<TestCase> {
    vec![TestCase::new(OFFLINE_TEST_NAME, offline_test)]
}

fn offline_test(ctx: &TestContext) -> Result<()> {
    let fetcher = ImageFetcher::new(ctx.config().release.clone());
    let scratch = scratch_dir(&ctx.config().scratch_base);
    offline_install(ctx, &fetcher, &scratch)
}

/// Fetch the image triad once, serve it on loopback and point the
/// installer at the local copy.
fn offline_install(ctx: &TestContext, fetcher: &ImageFetcher, scratch: &Path) -> Result<()> {
    let image_dir = fetcher.fetch_local_image(scratch)?;
    let release = image_dir.clone();
    ctx.defer(format!("remove {}", image_dir.display()), move |ctx| {
        ctx.remove_all(&release);
        Ok(())
    });

    let addr = HttpServer::new(image_dir).start(&ctx.config().listen_addr)?;
    let base_url = format!("http://{}", addr);
    info!("Installing from {}", base_url);

    let disk = prepare_disk(ctx)?;
    let ignition = stage_file(ctx, IGNITION_CONFIG)?;

    ctx.run_installer(&[
        "-d".to_string(),
        disk.loop_device.clone(),
        "-b".to_string(),
        base_url,
        "-i".to_string(),
        ignition.to_string_lossy().into_owned(),
    ])?;

    let mount_paths = mount_partitions(ctx, &disk)?;

    ctx.default_checks(&mount_paths, &disk.disk_file)?;
    ctx.validate_ignition(&mount_paths, IGNITION_CONFIG)
}
