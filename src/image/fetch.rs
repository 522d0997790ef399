use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use super::release::{resolve_default_channel_board_version, ReleaseTarget};
use super::{IMAGE_FILE, SIGNATURE_FILE, VERSION_FILE};
use crate::config::ReleaseConfig;

/// Downloads the image, signature and version metadata of a release.
pub struct ImageFetcher {
    config: ReleaseConfig,
    /// Replaces `https://{channel}.{domain}/{board}` when set
    base_url: Option<Url>,
    agent: ureq::Agent,
}

impl ImageFetcher {
    pub fn new(config: ReleaseConfig) -> Self {
        Self {
            config,
            base_url: None,
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    /// Fetch from a mirror laid out like a board directory, e.g. the local
    /// image server.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        let loopback = match base_url.host_str().map(|h| h.trim_matches(['[', ']'])) {
            Some("localhost") => true,
            Some(host) => host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false),
            None => false,
        };
        if loopback {
            let config = ureq::Agent::config_builder().proxy(None).build();
            self.agent = ureq::Agent::new_with_config(config);
        }
        self.base_url = Some(base_url);
        self
    }

    pub fn target(&self) -> Result<ReleaseTarget> {
        resolve_default_channel_board_version(&self.config)
    }

    /// `https://{channel}.{domain}/{board}/{version}/{name}`
    pub fn url_for(&self, target: &ReleaseTarget, name: &str) -> Result<Url> {
        let raw = match &self.base_url {
            Some(base) => format!(
                "{}/{}/{}",
                base.as_str().trim_end_matches('/'),
                target.version,
                name
            ),
            None => format!(
                "https://{}.{}/{}/{}/{}",
                target.channel, self.config.domain, target.board, target.version, name
            ),
        };
        Url::parse(&raw).with_context(|| format!("invalid release URL: {}", raw))
    }

    /// Download `name` of the host's default release into `dest_dir`.
    pub fn download_file(&self, dest_dir: &Path, name: &str) -> Result<PathBuf> {
        let target = self.target()?;
        self.download(&target, dest_dir, name)
    }

    fn download(&self, target: &ReleaseTarget, dest_dir: &Path, name: &str) -> Result<PathBuf> {
        let path = dest_dir.join(name);
        let file = File::create(&path).context("failed to create file")?;

        let url = self.url_for(target, name)?;
        info!("Downloading {}", url);

        let response = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|e| anyhow!("failed to download file: {}", e))?;

        let mut reader = response.into_body().into_reader();
        let mut writer = BufWriter::new(file);
        let bytes = io::copy(&mut reader, &mut writer).context("failed copying file data")?;
        writer.flush().context("failed copying file data")?;

        debug!("Wrote {} bytes to {}", bytes, path.display());
        Ok(path)
    }

    /// Download the image triad into a new directory under `scratch_dir`.
    /// A failed download removes the directory before the error is returned.
    pub fn fetch_local_image(&self, scratch_dir: &Path) -> Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .tempdir_in(scratch_dir)
            .context("failed creating temp dir")?
            .into_path();

        let target = match self.target() {
            Ok(target) => target,
            Err(e) => {
                discard(&dir);
                return Err(e);
            }
        };
        info!("Fetching {} into {}", target, dir.display());

        for (name, what) in [
            (IMAGE_FILE, "image"),
            (SIGNATURE_FILE, "signature"),
            (VERSION_FILE, "version"),
        ] {
            if let Err(e) = self.download(&target, &dir, name) {
                discard(&dir);
                return Err(e.context(format!("failed downloading {}", what)));
            }
        }

        Ok(dir)
    }
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("couldn't remove {}: {}", dir.display(), e);
    }
}

/// Where image triads go: the current TMPDIR, or `fallback` when unset.
pub fn scratch_dir(fallback: &Path) -> PathBuf {
    std::env::var_os("TMPDIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| fallback.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::server::HttpServer;

    fn defaults_config(dir: &Path) -> ReleaseConfig {
        ReleaseConfig {
            os_release: dir.join("no-os-release"),
            update_conf: dir.join("no-update.conf"),
            ..ReleaseConfig::default()
        }
    }

    fn triad(dir: &Path, version: &str) {
        fs::write(dir.join(VERSION_FILE), format!("COREOS_BUILD=1632\nCOREOS_VERSION={}\n", version)).unwrap();
        fs::write(dir.join(IMAGE_FILE), b"BZh91AY&SY image bytes").unwrap();
        fs::write(dir.join(SIGNATURE_FILE), b"-----BEGIN PGP SIGNATURE-----").unwrap();
    }

    #[test]
    fn test_release_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ImageFetcher::new(defaults_config(dir.path()));
        let target = ReleaseTarget::default();

        assert_eq!(
            fetcher.url_for(&target, IMAGE_FILE).unwrap().as_str(),
            "https://stable.release.core-os.net/amd64-usr/current/coreos_production_image.bin.bz2"
        );

        let beta = ReleaseTarget {
            channel: "beta".to_string(),
            board: "arm64-usr".to_string(),
            version: "1632.3.0".to_string(),
        };
        assert_eq!(
            fetcher.url_for(&beta, VERSION_FILE).unwrap().as_str(),
            "https://beta.release.core-os.net/arm64-usr/1632.3.0/version.txt"
        );
    }

    #[test]
    fn test_mirror_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ImageFetcher::new(defaults_config(dir.path()))
            .with_base_url(Url::parse("http://127.0.0.1:8080/").unwrap());
        assert_eq!(
            fetcher
                .url_for(&ReleaseTarget::default(), SIGNATURE_FILE)
                .unwrap()
                .as_str(),
            "http://127.0.0.1:8080/current/coreos_production_image.bin.bz2.sig"
        );
    }

    #[test]
    fn test_fetch_triad_from_local_server() {
        let served = tempfile::tempdir().unwrap();
        triad(served.path(), "current");
        let addr = HttpServer::new(served.path().to_path_buf())
            .start("127.0.0.1:0")
            .unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ImageFetcher::new(defaults_config(scratch.path()))
            .with_base_url(Url::parse(&format!("http://{}", addr)).unwrap());

        let dir = fetcher.fetch_local_image(scratch.path()).unwrap();
        for name in [IMAGE_FILE, SIGNATURE_FILE, VERSION_FILE] {
            assert_eq!(
                fs::read(dir.join(name)).unwrap(),
                fs::read(served.path().join(name)).unwrap()
            );
        }
    }

    #[test]
    fn test_partial_fetch_is_rolled_back() {
        // the server only knows /1632.3.0/..., the fetcher asks for /current/...
        let served = tempfile::tempdir().unwrap();
        triad(served.path(), "1632.3.0");
        let addr = HttpServer::new(served.path().to_path_buf())
            .start("127.0.0.1:0")
            .unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ImageFetcher::new(defaults_config(scratch.path()))
            .with_base_url(Url::parse(&format!("http://{}", addr)).unwrap());

        let err = fetcher.fetch_local_image(scratch.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("failed downloading image"));
        // the config paths never existed, so the scratch dir must be empty
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);

        // the version file itself is reachable
        let version = fetcher.download_file(scratch.path(), VERSION_FILE).unwrap();
        assert!(fs::read_to_string(version).unwrap().contains("COREOS_VERSION=1632.3.0"));
    }

    #[test]
    fn test_scratch_dir_fallback() {
        let fallback = Path::new("/var/tmp");
        let dir = scratch_dir(fallback);
        match std::env::var_os("TMPDIR").filter(|v| !v.is_empty()) {
            Some(tmp) => assert_eq!(dir, PathBuf::from(tmp)),
            None => assert_eq!(dir, fallback),
        }
    }
}
