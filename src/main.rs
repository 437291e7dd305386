//! Anvil - unified CLI entrypoint.
//!
//! Usage:
//!   anvil start [--config anvil.toml] [flag overrides...]
//!   anvil config validate --config anvil.toml
//!   anvil config show
//!   anvil version

use anvil::cli::commands::{run_config, run_start, run_version};
use anvil::cli::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => {
            run_start(cli.config.as_deref(), cli.log_level.as_deref(), args).await
        }
        Commands::Config(args) => run_config(cli.config.as_deref(), args),
        Commands::Version => {
            run_version();
            Ok(())
        }
    }
}
