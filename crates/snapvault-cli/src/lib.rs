//! snapvault CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// snapvault - File-system backed object storage for cluster backups
#[derive(Parser, Debug)]
#[command(name = "snapvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy or update the file-system store
    Deploy(commands::deploy::DeployArgs),
    /// Print the persisted mount configuration
    Config(commands::config::ConfigArgs),
    /// Print how backup tooling reaches the store
    StoreInfo(commands::store_info::StoreInfoArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Deploy(args) => commands::deploy::run(args).await,
            Commands::Config(args) => commands::config::run(args).await,
            Commands::StoreInfo(args) => commands::store_info::run(args).await,
        }
    }
}
