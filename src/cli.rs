use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the registered installer tests (requires root)
    Run {
        /// Only run tests whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,
        /// Write a JSON run report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// List the registered tests in run order
    List,
    /// Download the image, signature and version file of the host's release
    Fetch {
        /// Parent directory for the download (defaults to TMPDIR)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },
    /// Serve a downloaded image directory until interrupted
    Serve {
        /// Directory holding the image triad
        dir: PathBuf,
        /// Address to bind (overrides the config)
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Print the channel, board and version the host would install
    Release,
}
