//! Server runtime orchestration.
//!
//! The runtime wires configuration into the running pieces: the
//! layered content stack, the data tracker, the virtual filesystem,
//! and the event publisher, in that order. Collaborator servers (API
//! frontend, TFTP, DHCP midlayer) take handles from here.
//!
//! Signals: SIGHUP rebuilds the content stack and swaps the caches;
//! SIGINT and SIGTERM shut down cleanly (exit 0).

use crate::auth::TokenFactory;
use crate::core::certs;
use crate::core::config::Config;
use crate::events::Publishers;
use crate::models::{BootEnv, Entity, Profile, TemplateInfo, GLOBAL_PROFILE};
use crate::storage::memory::MemoryStore;
use crate::storage::stack::DataStack;
use crate::storage::{self, ContentStore, StoreMetadata};
use crate::tracker::{DataTracker, Services};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// The pxelinux fallback the built-in `ignore` bootenv renders: boot
/// whatever is on local disk.
const IGNORE_TEMPLATE: &str = "DEFAULT local\nPROMPT 0\nTIMEOUT 10\nLABEL local\nlocalboot 0\n";

/// The built-in basic content layer: the global profile and the
/// `ignore` bootenv every install can rely on existing.
pub fn basic_content() -> Result<Box<dyn ContentStore>> {
    let store = MemoryStore::with_metadata(StoreMetadata {
        name: "BasicStore".to_string(),
        description: "Built-in content".to_string(),
        source: "anvil".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let objects: Vec<Entity> = vec![
        Entity::Profile(Profile {
            name: GLOBAL_PROFILE.to_string(),
            description: "Global parameters".to_string(),
            ..Default::default()
        }),
        Entity::Template(crate::models::Template {
            id: "ignore".to_string(),
            description: "Boot from local disk".to_string(),
            contents: IGNORE_TEMPLATE.to_string(),
            ..Default::default()
        }),
        Entity::BootEnv(BootEnv {
            name: "ignore".to_string(),
            description: "Ignore unknown machines".to_string(),
            only_unknown: true,
            templates: vec![TemplateInfo {
                name: "pxelinux".to_string(),
                id: "ignore".to_string(),
                path: "pxelinux.cfg/default".to_string(),
            }],
            ..Default::default()
        }),
    ];
    for ent in objects {
        store.save(ent.prefix(), &ent.key(), &ent.to_value()?)?;
    }
    Ok(Box::new(store))
}

/// Build the layered content stack from configuration.
pub fn build_stack(config: &Config) -> Result<DataStack> {
    let backend_uri = if config.content.backend.contains("://") {
        config.content.backend.clone()
    } else {
        let root = config.paths.resolve(&config.paths.data_root);
        format!("{}://{}", config.content.backend, root.display())
    };
    let mut writable = storage::open(&backend_uri)
        .with_context(|| format!("opening backend content {backend_uri}"))?;
    if writable.metadata().name.is_empty() {
        writable.set_metadata(StoreMetadata::backing())?;
    }

    let local = open_optional(&config.content.local_content, StoreMetadata::local())
        .context("opening local content")?;
    let default_content = open_optional(
        &config.content.default_content,
        StoreMetadata::default_content(),
    )
    .context("opening default content")?;

    let mut stack = DataStack::new(writable, local, default_content, basic_content()?);

    // SAAS layers: every file in the saas directory is a single-file
    // content store named by its own metadata.
    let saas_dir = config.paths.resolve(&config.paths.saas_root);
    if saas_dir.is_dir() {
        for entry in std::fs::read_dir(&saas_dir)
            .with_context(|| format!("listing {}", saas_dir.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let store = storage::open(&format!("file://{}", path.display()))
                .with_context(|| format!("opening SAAS content {}", path.display()))?;
            let name = store.metadata().name;
            stack
                .add_replace_saas(&name, store)
                .map_err(|e| anyhow::anyhow!(e.to_string()))
                .with_context(|| format!("mounting SAAS content {}", path.display()))?;
        }
    }
    Ok(stack)
}

fn open_optional(uri: &str, fallback_md: StoreMetadata) -> Result<Option<Box<dyn ContentStore>>> {
    if uri.is_empty() {
        return Ok(None);
    }
    let mut store = storage::open(uri)?;
    if store.metadata().name.is_empty() {
        store.set_metadata(fallback_md)?;
    }
    Ok(Some(store))
}

/// Build the services bundle hooks and the renderer run with.
pub fn build_services(config: &Config) -> Services {
    let mut tokens = TokenFactory::new();
    tokens.unknown_token_timeout = config.security.unknown_token_timeout;
    tokens.known_token_timeout = config.security.known_token_timeout;
    Services {
        file_root: config.paths.resolve(&config.paths.file_root),
        log_root: config.paths.resolve(&config.paths.log_root),
        our_address: config.server.static_ip.clone(),
        file_url: config.file_url(),
        api_url: config.api_url(),
        command_url: config.server.command_url.clone(),
        default_boot_env: config.bootenvs.default.clone(),
        unknown_boot_env: config.bootenvs.unknown.clone(),
        vfs: Arc::new(crate::render::vfs::VirtualFs::new()),
        tokens,
    }
}

/// The assembled server.
pub struct Runtime {
    config: Arc<Config>,
    tracker: Option<Arc<DataTracker>>,
    publishers: Arc<Publishers>,
}

impl Runtime {
    /// Create a runtime; components start in [`Runtime::start`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        Ok(Self {
            config: Arc::new(config),
            tracker: None,
            publishers: Arc::new(Publishers::new()),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The data tracker, once started.
    pub fn tracker(&self) -> Option<&Arc<DataTracker>> {
        self.tracker.as_ref()
    }

    /// The event publisher registry.
    pub fn publishers(&self) -> &Arc<Publishers> {
        &self.publishers
    }

    /// Bring everything up: directories, TLS material, content stack,
    /// tracker.
    pub fn start(&mut self) -> Result<()> {
        let cfg = &self.config;
        for dir in [
            &cfg.paths.data_root,
            &cfg.paths.file_root,
            &cfg.paths.log_root,
            &cfg.paths.plugin_root,
        ] {
            let path = cfg.paths.resolve(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("creating {}", path.display()))?;
        }

        let cert = PathBuf::from(&cfg.security.tls_cert);
        let key = PathBuf::from(&cfg.security.tls_key);
        if certs::ensure_tls(&cert, &key, &[cfg.server.static_ip.clone()])? {
            tracing::info!(cert = %cert.display(), "generated self-signed TLS certificate");
        }

        let stack = build_stack(cfg)?;
        let services = build_services(cfg);
        let tracker = DataTracker::new(stack, services, self.publishers.clone())
            .context("loading operational data")?;
        self.tracker = Some(Arc::new(tracker));

        tracing::info!(
            api = %cfg.api_url(),
            files = %cfg.file_url(),
            "anvil runtime started"
        );
        Ok(())
    }

    /// Run until SIGINT or SIGTERM; SIGHUP reloads the content stack.
    pub async fn run(&mut self) -> Result<()> {
        self.start()?;

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
            let mut term =
                signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown signal received (SIGINT)");
                        break;
                    }
                    _ = term.recv() => {
                        tracing::info!("shutdown signal received (SIGTERM)");
                        break;
                    }
                    _ = hup.recv() => {
                        tracing::info!("SIGHUP received, rebuilding content stack");
                        if let Some(tracker) = &self.tracker {
                            let swapped = build_stack(&self.config)
                                .and_then(|stack| tracker.replace_stack(stack));
                            match swapped {
                                Ok(()) => tracing::info!("content stack reloaded"),
                                Err(err) => tracing::error!(error = %err, "reload failed, keeping previous state"),
                            }
                        }
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            tracing::info!("shutdown signal received");
        }

        self.stop();
        Ok(())
    }

    /// Tear everything down.
    pub fn stop(&mut self) {
        self.tracker = None;
        tracing::info!("anvil runtime stopped");
    }
}
