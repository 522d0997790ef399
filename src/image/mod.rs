pub mod fetch;
pub mod release;
pub mod server;

pub use fetch::ImageFetcher;
pub use release::{resolve_default_channel_board_version, ReleaseTarget};
pub use server::HttpServer;

pub const IMAGE_FILE: &str = "coreos_production_image.bin.bz2";
pub const SIGNATURE_FILE: &str = "coreos_production_image.bin.bz2.sig";
pub const VERSION_FILE: &str = "version.txt";
