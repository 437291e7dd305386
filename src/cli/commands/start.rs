//! Start command implementation.

use crate::core::config::Config;
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the provisioning server. Flags override the config file.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Storage backend: a store type ("directory", "kv", "file") or a
    /// full store URI.
    #[arg(long)]
    pub backend: Option<String>,

    /// Directory runtime data lands in.
    #[arg(long)]
    pub data_root: Option<String>,

    /// Root of the managed boot file tree.
    #[arg(long)]
    pub file_root: Option<String>,

    /// Directory job logs land in.
    #[arg(long)]
    pub log_root: Option<String>,

    /// Directory plugin content is mounted from.
    #[arg(long)]
    pub plugin_root: Option<String>,

    /// IP address to advertise for the static HTTP file server.
    #[arg(long)]
    pub static_ip: Option<String>,

    /// Port for the static HTTP file server.
    #[arg(long)]
    pub static_port: Option<u16>,

    /// Port for the TFTP server.
    #[arg(long)]
    pub tftp_port: Option<u16>,

    /// Port for the DHCP server.
    #[arg(long)]
    pub dhcp_port: Option<u16>,

    /// Port for the API server.
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Comma-separated interfaces the DHCP server listens on.
    #[arg(long)]
    pub dhcp_ifs: Option<String>,

    /// Local override content URI.
    #[arg(long)]
    pub local_content: Option<String>,

    /// Default content URI.
    #[arg(long)]
    pub default_content: Option<String>,

    /// TLS certificate path (generated if missing).
    #[arg(long)]
    pub tls_cert: Option<String>,

    /// TLS key path (generated if missing).
    #[arg(long)]
    pub tls_key: Option<String>,

    /// Default bootenv for machines.
    #[arg(long)]
    pub default_boot_env: Option<String>,

    /// Bootenv used to answer unknown machines.
    #[arg(long)]
    pub unknown_boot_env: Option<String>,

    /// DHCP debug level (0-2).
    #[arg(long)]
    pub debug_dhcp: Option<u8>,

    /// Renderer debug level (0-2).
    #[arg(long)]
    pub debug_renderer: Option<u8>,

    /// Frontend debug level (0-2).
    #[arg(long)]
    pub debug_frontend: Option<u8>,
}

impl StartArgs {
    /// Fold the flags into a loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        let strings: [(&Option<String>, &mut String); 12] = [
            (&self.backend, &mut config.content.backend),
            (&self.data_root, &mut config.paths.data_root),
            (&self.file_root, &mut config.paths.file_root),
            (&self.log_root, &mut config.paths.log_root),
            (&self.plugin_root, &mut config.paths.plugin_root),
            (&self.static_ip, &mut config.server.static_ip),
            (&self.local_content, &mut config.content.local_content),
            (&self.default_content, &mut config.content.default_content),
            (&self.tls_cert, &mut config.security.tls_cert),
            (&self.tls_key, &mut config.security.tls_key),
            (&self.default_boot_env, &mut config.bootenvs.default),
            (&self.unknown_boot_env, &mut config.bootenvs.unknown),
        ];
        for (flag, target) in strings {
            if let Some(v) = flag {
                *target = v.clone();
            }
        }
        if let Some(p) = self.static_port {
            config.server.static_port = p;
        }
        if let Some(p) = self.tftp_port {
            config.server.tftp_port = p;
        }
        if let Some(p) = self.dhcp_port {
            config.server.dhcp_port = p;
        }
        if let Some(p) = self.api_port {
            config.server.api_port = p;
        }
        if let Some(ifs) = &self.dhcp_ifs {
            config.server.dhcp_interfaces =
                ifs.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(l) = self.debug_dhcp {
            config.debug.dhcp = l;
        }
        if let Some(l) = self.debug_renderer {
            config.debug.renderer = l;
        }
        if let Some(l) = self.debug_frontend {
            config.debug.frontend = l;
        }
    }
}

/// Initialize the tracing subscriber.
fn init_tracing(config: &Config, log_level: Option<&str>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let directives = match log_level {
        Some(level) => level.to_string(),
        None => config.debug.filter_directives(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Load configuration, apply flags, and run the server.
pub async fn run_start(
    config_path: Option<&str>,
    log_level: Option<&str>,
    args: StartArgs,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None if Path::new("anvil.toml").exists() => Config::from_file("anvil.toml")?,
        None => Config::default(),
    };
    args.apply(&mut config);
    init_tracing(&config, log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
