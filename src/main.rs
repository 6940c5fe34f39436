use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use pypi_private::prelude::*;
use pypi_private::util::config::DEFAULT_CONFIG_PATH;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Publish Python package dists to a private index")]
struct Cli {
    /// Project root that the dist dir is relative to.
    #[arg(short, long, default_value = ".")]
    project_path: PathBuf,

    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    conf_path: PathBuf,

    /// More output (repeatable: -v, -vv).
    #[arg(short, long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload the dists of one package version and update the index
    Publish {
        #[arg(short, long, default_value = "dist")]
        dist_dir: PathBuf,

        /// Write the index paths of uploaded dists to this file
        #[arg(long)]
        report: Option<PathBuf>,

        pkg_name: String,
        pkg_ver: String,
    },
    /// Regenerate a package's index page and the root index page
    Reindex { pkg_name: String },
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pypi_private={level}")));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    // Without any -v, info is shown.
    init_logging(cli.verbosity.saturating_add(1));
    debug!("starting pypi-private");

    let config = PrivateIndexConfig::load(&cli.conf_path, std::env::vars().collect()).await?;
    let storage = load_storage(&config).await?;
    let publisher = Publisher::new(storage.as_ref(), config.content_hash()?);

    match cli.command {
        Command::Publish {
            dist_dir,
            report,
            pkg_name,
            pkg_ver,
        } => {
            let result = publisher
                .publish_package(&pkg_name, &pkg_ver, &cli.project_path, &dist_dir)
                .await?;
            info!(
                "published {} dists ({} already present)",
                result.uploaded.len(),
                result.skipped.len()
            );
            if let Some(report) = report {
                result.write_to(&report).await?;
            }
        }
        Command::Reindex { pkg_name } => {
            publisher.reindex_package(&pkg_name).await?;
        }
    }

    Ok(())
}
