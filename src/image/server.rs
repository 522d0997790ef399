use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::{IMAGE_FILE, SIGNATURE_FILE, VERSION_FILE};
use crate::utils::pattern;

const VERSION_PATTERN: &str = r"COREOS_VERSION=(.*)";

/// Serves an image triad directory the way a release board directory is
/// laid out, so the installer can be pointed at it with a base URL.
pub struct HttpServer {
    file_dir: PathBuf,
}

/// Request path to file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub version: String,
    files: HashMap<String, PathBuf>,
}

impl Routes {
    pub fn lookup(&self, path: &str) -> Option<&PathBuf> {
        self.files.get(path)
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

impl HttpServer {
    pub fn new(file_dir: PathBuf) -> Self {
        Self { file_dir }
    }

    /// `/current/version.txt` plus the image and signature under the
    /// version named in `version.txt`.
    pub fn routes(&self) -> Result<Routes> {
        let version_path = self.file_dir.join(VERSION_FILE);
        let data = fs::read(&version_path).context("Couldn't read version.txt")?;
        let version = pattern::search("version", VERSION_PATTERN, &data)?
            .trim()
            .to_string();

        let mut files = HashMap::new();
        files.insert(format!("/current/{}", VERSION_FILE), version_path);
        for name in [IMAGE_FILE, SIGNATURE_FILE] {
            files.insert(format!("/{}/{}", version, name), self.file_dir.join(name));
        }

        Ok(Routes { version, files })
    }

    /// Bind and start serving on a background thread. Returns the bound
    /// address. The server lives until the process exits.
    pub fn start(&self, listen_addr: &str) -> Result<String> {
        let routes = Arc::new(self.routes()?);

        let listener = std::net::TcpListener::bind(listen_addr).context("creating listener")?;
        listener
            .set_nonblocking(true)
            .context("creating listener")?;
        let addr = listener.local_addr().context("creating listener")?;

        std::thread::Builder::new()
            .name("image-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("image server runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(serve(listener, routes));
            })
            .context("spawning image server")?;

        info!("Serving {} on {}", self.file_dir.display(), addr);
        Ok(addr.to_string())
    }
}

async fn serve(listener: std::net::TcpListener, routes: Arc<Routes>) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!("image server listener: {}", e);
            return;
        }
    };

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let routes = routes.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle(stream, &routes).await {
                        debug!("request from {} failed: {:#}", peer, e);
                    }
                });
            }
            Err(e) => warn!("accept failed: {}", e),
        }
    }
}

async fn handle(stream: TcpStream, routes: &Routes) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // drain headers
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim_end().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default();
    debug!("{} {}", method, path);

    let mut stream = reader.into_inner();

    if method != "GET" && method != "HEAD" {
        return respond_status(&mut stream, "405 Method Not Allowed").await;
    }

    let Some(file_path) = routes.lookup(path) else {
        return respond_status(&mut stream, "404 Not Found").await;
    };

    let mut file = match tokio::fs::File::open(file_path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("{}: {}", file_path.display(), e);
            return respond_status(&mut stream, "404 Not Found").await;
        }
    };
    let len = file.metadata().await?.len();

    let content_type = if path.ends_with(".txt") {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    };
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        content_type, len
    );
    stream.write_all(header.as_bytes()).await?;
    if method == "GET" {
        tokio::io::copy(&mut file, &mut stream).await?;
    }
    stream.shutdown().await?;
    Ok(())
}

async fn respond_status(stream: &mut TcpStream, status: &str) -> Result<()> {
    let body = format!("{}\n", status);
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::path::Path;

    fn triad(dir: &Path) {
        fs::write(dir.join(VERSION_FILE), "COREOS_BUILD=1632\nCOREOS_VERSION=1632.3.0\n").unwrap();
        fs::write(dir.join(IMAGE_FILE), b"image").unwrap();
        fs::write(dir.join(SIGNATURE_FILE), b"signature").unwrap();
    }

    fn get(addr: &str, request: &str) -> String {
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_routes_follow_version_file() {
        let dir = tempfile::tempdir().unwrap();
        triad(dir.path());

        let routes = HttpServer::new(dir.path().to_path_buf()).routes().unwrap();
        assert_eq!(routes.version, "1632.3.0");
        assert_eq!(
            routes.paths(),
            vec![
                "/1632.3.0/coreos_production_image.bin.bz2",
                "/1632.3.0/coreos_production_image.bin.bz2.sig",
                "/current/version.txt",
            ]
        );
        assert_eq!(
            routes.lookup("/current/version.txt"),
            Some(&dir.path().join(VERSION_FILE))
        );
    }

    #[test]
    fn test_routes_require_version_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HttpServer::new(dir.path().to_path_buf()).routes().is_err());

        fs::write(dir.path().join(VERSION_FILE), "COREOS_BUILD=1632\n").unwrap();
        assert!(HttpServer::new(dir.path().to_path_buf()).start("127.0.0.1:0").is_err());
    }

    #[test]
    fn test_serves_exactly_three_routes() {
        let dir = tempfile::tempdir().unwrap();
        triad(dir.path());
        let addr = HttpServer::new(dir.path().to_path_buf())
            .start("127.0.0.1:0")
            .unwrap();

        let response = get(&addr, "GET /1632.3.0/coreos_production_image.bin.bz2.sig HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("\r\n\r\nsignature"));

        let response = get(&addr, "GET /current/version.txt HTTP/1.1\r\n\r\n");
        assert!(response.contains("COREOS_VERSION=1632.3.0"));

        let response = get(&addr, "GET /1632.3.0/version.txt HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));

        let response = get(&addr, "DELETE /current/version.txt HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 405"));
    }
}
