//! Configuration inspection commands.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Check that the configuration file parses and validates.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Run a configuration command.
pub fn run_config(config_path: Option<&str>, args: ConfigArgs) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => Config::default(),
    };
    match args.action {
        ConfigAction::Validate => {
            config.validate()?;
            println!("configuration OK");
        }
        ConfigAction::Show => {
            let rendered =
                toml::to_string_pretty(&config).context("rendering configuration")?;
            print!("{rendered}");
        }
    }
    Ok(())
}
