use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Commands;
use installer_harness::config::HarnessConfig;
use installer_harness::core::Runner;
use installer_harness::image::fetch::scratch_dir;
use installer_harness::image::{HttpServer, ImageFetcher};
use installer_harness::preflight::Preflight;
use installer_harness::suites;
use installer_harness::utils::Shell;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "installer-harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,

    /// Harness configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("installer_harness={},warn", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => HarnessConfig::default(),
    };

    let result = match cli.command {
        Commands::Run { filter, report } => run(config, filter, report).await,
        Commands::List => {
            for name in suites::registry().names() {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Fetch { dest } => {
            let dest = dest.unwrap_or_else(|| scratch_dir(&config.scratch_base));
            let fetcher = ImageFetcher::new(config.release.clone());
            let dir = tokio::task::spawn_blocking(move || fetcher.fetch_local_image(&dest))
                .await
                .context("fetch task panicked")??;
            println!("{}", dir.display());
            Ok(())
        }
        Commands::Serve { dir, listen } => {
            let listen = listen.unwrap_or_else(|| config.listen_addr.clone());
            match HttpServer::new(dir).start(&listen) {
                Ok(addr) => {
                    println!("http://{}", addr);
                    tokio::signal::ctrl_c()
                        .await
                        .context("waiting for Ctrl-C")?;
                    info!("Shutting down");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Commands::Release => {
            let fetcher = ImageFetcher::new(config.release.clone());
            fetcher.target().map(|target| println!("{}", target))
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("✗ Operation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(config: HarnessConfig, filter: Option<String>, report_path: Option<PathBuf>) -> Result<()> {
    info!("installer-harness v{} starting", env!("CARGO_PKG_VERSION"));

    let shell = Shell::system();
    Preflight::new(shell.clone(), &config).check()?;

    let runner = Runner::new(config, shell);
    let report = tokio::task::spawn_blocking(move || {
        let registry = suites::registry();
        runner.run_all(&registry, filter.as_deref())
    })
    .await
    .context("test runner panicked")?;

    if let Some(path) = report_path {
        report.write_to(&path)?;
        info!("Report written to {}", path.display());
    }

    if report.success() {
        info!("✓ All {} test(s) passed", report.outcomes.len());
        Ok(())
    } else {
        anyhow::bail!("{} of {} test(s) failed", report.failed(), report.outcomes.len())
    }
}
