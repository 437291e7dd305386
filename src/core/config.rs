//! Configuration parsing and validation.
//!
//! Configuration comes from a TOML file with serde-supplied defaults;
//! the `start` command's flags override individual fields. Sections
//! mirror the server's moving parts: listeners, filesystem layout,
//! content layers, security, bootenv defaults, and per-subsystem debug
//! levels.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener ports and addresses.
    pub server: ServerConfig,

    /// Filesystem layout.
    pub paths: PathConfig,

    /// Content layer sources.
    pub content: ContentConfig,

    /// TLS and token settings.
    pub security: SecurityConfig,

    /// Default boot environments.
    pub bootenvs: BootEnvConfig,

    /// Per-subsystem debug levels (0 = warn, 1 = info, 2 = debug).
    pub debug: DebugConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address advertised for the static HTTP file server.
    pub static_ip: String,
    /// Port for the static HTTP file server.
    pub static_port: u16,
    /// Port for the TFTP server.
    pub tftp_port: u16,
    /// Port for the DHCP server.
    pub dhcp_port: u16,
    /// Port for the API server.
    pub api_port: u16,
    /// Interfaces the DHCP server listens on; empty means all.
    pub dhcp_interfaces: Vec<String>,
    /// Endpoint agents hit for command callbacks.
    pub command_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            static_ip: "192.168.124.11".to_string(),
            static_port: 8091,
            tftp_port: 69,
            dhcp_port: 67,
            api_port: 8092,
            dhcp_interfaces: Vec::new(),
            command_url: String::new(),
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory all other relative paths hang off.
    pub base_root: String,
    /// Where the writable backing store lives.
    pub data_root: String,
    /// Root of the managed boot file tree.
    pub file_root: String,
    /// Where job logs land.
    pub log_root: String,
    /// Where plugin content layers are mounted from.
    pub plugin_root: String,
    /// Where SAAS content layers are picked up from.
    pub saas_root: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            base_root: ".".to_string(),
            data_root: "anvil-data".to_string(),
            file_root: "tftpboot".to_string(),
            log_root: "job-logs".to_string(),
            plugin_root: "plugins".to_string(),
            saas_root: "saas-content".to_string(),
        }
    }
}

impl PathConfig {
    /// Resolve one of the configured directories against the base.
    pub fn resolve(&self, dir: &str) -> std::path::PathBuf {
        let p = Path::new(dir);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            Path::new(&self.base_root).join(p)
        }
    }
}

/// Content layer sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Writable backing store: a bare store type ("directory", "kv",
    /// "file", "memory") rooted at data_root, or a full store URI.
    pub backend: String,
    /// Local override content URI; empty for none.
    pub local_content: String,
    /// Default content URI; empty for none.
    pub default_content: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            backend: "directory".to_string(),
            local_content: String::new(),
            default_content: String::new(),
        }
    }
}

/// TLS and token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// TLS certificate path; generated if missing.
    pub tls_cert: String,
    /// TLS key path; generated if missing.
    pub tls_key: String,
    /// Seconds an unknown-machine token stays valid.
    pub unknown_token_timeout: u64,
    /// Seconds a known-machine token stays valid.
    pub known_token_timeout: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            tls_cert: "server.crt".to_string(),
            tls_key: "server.key".to_string(),
            unknown_token_timeout: crate::auth::DEFAULT_UNKNOWN_TOKEN_TIMEOUT,
            known_token_timeout: crate::auth::DEFAULT_KNOWN_TOKEN_TIMEOUT,
        }
    }
}

/// Default boot environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootEnvConfig {
    /// BootEnv machines get when they do not pick one.
    pub default: String,
    /// BootEnv used to answer unknown machines.
    pub unknown: String,
}

impl Default for BootEnvConfig {
    fn default() -> Self {
        Self {
            default: "local".to_string(),
            unknown: "ignore".to_string(),
        }
    }
}

/// Per-subsystem debug levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// DHCP engine.
    pub dhcp: u8,
    /// Template renderer.
    pub renderer: u8,
    /// API frontend.
    pub frontend: u8,
    /// Content storage.
    pub storage: u8,
}

impl DebugConfig {
    fn level_str(level: u8) -> &'static str {
        match level {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    /// Build a tracing EnvFilter directive string.
    pub fn filter_directives(&self) -> String {
        format!(
            "info,anvil::dhcp={},anvil::render={},anvil::storage={},anvil::cli={}",
            Self::level_str(self.dhcp),
            Self::level_str(self.renderer),
            Self::level_str(self.storage),
            Self::level_str(self.frontend),
        )
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// URL of the static file server.
    pub fn file_url(&self) -> String {
        format!("http://{}:{}", self.server.static_ip, self.server.static_port)
    }

    /// URL of the API server.
    pub fn api_url(&self) -> String {
        format!("https://{}:{}", self.server.static_ip, self.server.api_port)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.static_ip.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!("server.static_ip {} is not an IP address", self.server.static_ip);
        }
        for (name, port) in [
            ("static_port", self.server.static_port),
            ("api_port", self.server.api_port),
        ] {
            if port == 0 {
                anyhow::bail!("server.{name} must not be zero");
            }
        }
        if self.server.static_port == self.server.api_port {
            anyhow::bail!("server.static_port and server.api_port collide");
        }
        if self.bootenvs.default.is_empty() || self.bootenvs.unknown.is_empty() {
            anyhow::bail!("bootenvs.default and bootenvs.unknown must be set");
        }
        if self.security.unknown_token_timeout == 0 || self.security.known_token_timeout == 0 {
            anyhow::bail!("token timeouts must not be zero");
        }
        let known = ["directory", "kv", "file", "memory"];
        let backend = &self.content.backend;
        if !backend.contains("://") && !known.contains(&backend.as_str()) {
            anyhow::bail!("content.backend {backend} is not a store type or URI");
        }
        Ok(())
    }
}
