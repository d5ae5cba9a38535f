//! snapvault CLI
//!
//! Deploys the file-system backed object store and reads back its state.

use clap::Parser;

use snapvault_cli::{Cli, Result};
use snapvault_common::telemetry::{init_logging, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogFormat::from_env())?;

    let cli = Cli::parse();
    cli.run().await
}
