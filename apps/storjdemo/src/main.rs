//! storjdemo node entry point.

mod app;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "storjdemo", version, about = "Hand a file off to a farmer and keep checking it is still there")]
struct Cli {
    /// JSON configuration file; defaults apply to anything it omits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Store files for uploaders and answer their challenges.
    Farmer {
        /// Address the channel server listens on.
        #[arg(long, default_value = "127.0.0.1:5000")]
        listen: SocketAddr,
    },
    /// Hand a file off to a farmer and challenge it periodically.
    Uploader {
        /// Channel address of the farmer.
        #[arg(long)]
        farmer: String,

        /// File to hand off.
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::NodeConfig::load(cli.config.as_deref())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting storjdemo");

    let rt = tokio::runtime::Runtime::new()?;
    let code = rt.block_on(async {
        match cli.role {
            Role::Farmer { listen } => app::run_farmer(listen, config).await,
            Role::Uploader { farmer, file } => app::run_uploader(&farmer, &file, config).await,
        }
    })?;
    drop(rt);

    tracing::info!(code, "node shut down");
    std::process::exit(code);
}
