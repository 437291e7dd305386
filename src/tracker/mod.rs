//! The data tracker.
//!
//! Owner of all live entity state. The tracker composes the layered
//! content store, the per-prefix caches with their locks, the entity
//! hooks, and the event publisher into the CRUD surface everything
//! else (API frontend, DHCP engine, renderer) uses.
//!
//! All four operations run the same way: acquire the declared lock
//! set, run the entity's hooks, persist through the writable content
//! layer, mutate the cache only after the persist commits, then emit
//! one event. Validation runs synchronously under the same lock set,
//! so `available` is observable the moment an operation returns.

pub mod cache;
pub mod index;
pub mod locks;

use crate::auth::TokenFactory;
use crate::core::error::{ModelError, TrackerError, TrackerResult};
use crate::events::{Event, Publishers};
use crate::models::{self, prefix, Entity};
use crate::render::{self, vfs::VirtualFs, RenderedTemplate};
use crate::storage::{self, stack::DataStack, ContentStore};
use anyhow::Context as _;
use locks::{LockRegistry, LockedStores};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration-derived context handed to entity hooks and the
/// renderer. Hooks get this bundle explicitly instead of entities
/// carrying a pointer back to the tracker.
#[derive(Debug, Clone)]
pub struct Services {
    /// Root of the on-disk file tree the file server manages.
    pub file_root: PathBuf,
    /// Directory job logs land in.
    pub log_root: PathBuf,
    /// Address to advertise for the static file server.
    pub our_address: String,
    /// URL of the static file server.
    pub file_url: String,
    /// URL of the API server.
    pub api_url: String,
    /// URL agents hit for command callbacks.
    pub command_url: String,
    /// BootEnv assigned to machines that do not pick one.
    pub default_boot_env: String,
    /// BootEnv used to answer requests from unknown machines.
    pub unknown_boot_env: String,
    /// The virtual filesystem rendered artifacts register into.
    pub vfs: Arc<VirtualFs>,
    /// Bearer token factory.
    pub tokens: TokenFactory,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            file_root: PathBuf::from("tftpboot"),
            log_root: PathBuf::from("job-logs"),
            our_address: "127.0.0.1".to_string(),
            file_url: "http://127.0.0.1:8091".to_string(),
            api_url: "https://127.0.0.1:8092".to_string(),
            command_url: String::new(),
            default_boot_env: "local".to_string(),
            unknown_boot_env: "ignore".to_string(),
            vfs: Arc::new(VirtualFs::new()),
            tokens: TokenFactory::new(),
        }
    }
}

/// CRUD operation kinds, used to parameterise the one commit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Create,
    Update,
    Save,
}

impl Op {
    fn action(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Save => "save",
        }
    }
}

/// Everything there is to know about tracking operational data.
pub struct DataTracker {
    registry: LockRegistry,
    backend: RwLock<DataStack>,
    publishers: Arc<Publishers>,
    services: Services,
}

impl DataTracker {
    /// Build a tracker over a content stack, load every prefix into
    /// the caches, and run the boot validation pass.
    pub fn new(
        stack: DataStack,
        services: Services,
        publishers: Arc<Publishers>,
    ) -> anyhow::Result<Self> {
        stack
            .validate()
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .context("content stack failed validation")?;
        let dt = Self {
            registry: LockRegistry::new(&prefix::ALL),
            backend: RwLock::new(stack),
            publishers,
            services,
        };
        let mut d = dt.registry.lock_all();
        dt.reload_into(&mut d)?;
        drop(d);
        Ok(dt)
    }

    /// The services bundle hooks and renderers run with.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The event publisher registry.
    pub fn publishers(&self) -> &Arc<Publishers> {
        &self.publishers
    }

    /// Acquire a lock set. Prefixes are acquired in canonical order
    /// regardless of the order given here.
    pub fn lock(&self, prefixes: &[&'static str]) -> LockedStores<'_> {
        self.registry.lock(prefixes)
    }

    /// Acquire the lock set the static tables declare for an action.
    pub fn lock_for(&self, pfx: &'static str, action: models::Action) -> LockedStores<'_> {
        self.registry.lock(models::locks_for(pfx, action))
    }

    /// Acquire every prefix.
    pub fn lock_all(&self) -> LockedStores<'_> {
        self.registry.lock_all()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Copy out one entity.
    pub fn fetch_one(&self, d: &LockedStores<'_>, pfx: &str, key: &str) -> Option<Entity> {
        d.store(pfx).find(key).cloned()
    }

    /// Copy out every entity under a prefix.
    pub fn fetch_all(&self, d: &LockedStores<'_>, pfx: &str) -> Vec<Entity> {
        d.store(pfx).items().to_vec()
    }

    /// Range-query a prefix by one of its secondary indexes. `None`
    /// if the index does not exist for the prefix.
    pub fn list(
        &self,
        d: &LockedStores<'_>,
        pfx: &str,
        index_name: &str,
        pred: &cache::Predicate,
    ) -> Option<Vec<Entity>> {
        let idx = index::Index::named(Entity::indexes(pfx), index_name)?;
        Some(d.store(pfx).range_by(idx, pred))
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Create a new entity. Fails if the key is empty or taken.
    pub fn create(&self, d: &mut LockedStores<'_>, ent: Entity) -> TrackerResult<Entity> {
        self.commit(d, ent, Op::Create)
    }

    /// Update an existing entity. Fails if the key is absent.
    pub fn update(&self, d: &mut LockedStores<'_>, ent: Entity) -> TrackerResult<Entity> {
        self.commit(d, ent, Op::Update)
    }

    /// Upsert an entity.
    pub fn save(&self, d: &mut LockedStores<'_>, ent: Entity) -> TrackerResult<Entity> {
        self.commit(d, ent, Op::Save)
    }

    /// Remove an entity. Referential integrity hooks may refuse.
    pub fn remove(&self, d: &mut LockedStores<'_>, ent: &Entity) -> TrackerResult<Entity> {
        let pfx = ent.prefix();
        let key = ent.key();
        let existing = match d.store(pfx).find(&key) {
            Some(e) => e.clone(),
            None => return Err(TrackerError::NotFound { prefix: pfx, key }),
        };
        if existing.validation().read_only {
            return Err(TrackerError::ReadOnly { prefix: pfx, key });
        }
        self.run_before_delete(&existing, d)?;
        self.backend
            .read()
            .remove(pfx, &key)
            .with_context(|| format!("removing {pfx}/{key}"))?;
        d.store_mut(pfx).remove(&key);
        if let Entity::Machine(m) = &existing {
            self.services.vfs.deregister_machine(m.uuid);
        }
        self.publish(pfx, "delete", &key, &existing);
        Ok(existing)
    }

    fn commit(&self, d: &mut LockedStores<'_>, mut ent: Entity, op: Op) -> TrackerResult<Entity> {
        let pfx = ent.prefix();
        let key = ent.key();
        if key.is_empty() {
            return Err(TrackerError::EmptyKey { prefix: pfx });
        }
        let existing = d.store(pfx).find(&key).cloned();
        match (op, &existing) {
            (Op::Create, Some(_)) => {
                return Err(TrackerError::AlreadyExists { prefix: pfx, key })
            }
            (Op::Update, None) => return Err(TrackerError::NotFound { prefix: pfx, key }),
            _ => {}
        }
        if let Some(old) = &existing {
            if old.validation().read_only {
                return Err(TrackerError::ReadOnly { prefix: pfx, key });
            }
        }

        match &existing {
            None => self.run_on_create(&ent, d)?,
            Some(old) => self.run_on_change(old, &ent)?,
        }
        let rendered = self.run_before_save(&mut ent, existing.as_ref(), d)?;

        let value = ent.to_value()?;
        self.backend
            .read()
            .save(pfx, &key, &value)
            .with_context(|| format!("saving {pfx}/{key}"))?;
        d.store_mut(pfx).insert(ent.clone());

        if let Entity::Machine(m) = &ent {
            // Re-registration replaces whatever the machine had
            // rendered before, including artifacts of its old bootenv.
            self.services.vfs.deregister_machine(m.uuid);
            if let Some(set) = &rendered {
                render::register_rendered(&self.services.vfs, m, &m.boot_env, set);
            }
        }

        let action = if existing.is_some() || op == Op::Create {
            op.action()
        } else {
            // A save that created the key reports itself as a create.
            "create"
        };
        self.publish(pfx, action, &key, &ent);
        Ok(ent)
    }

    fn publish(&self, pfx: &str, action: &str, key: &str, ent: &Entity) {
        let object = ent.to_value().unwrap_or(serde_json::Value::Null);
        self.publishers.publish(&Event::new(pfx, action, key, object));
    }

    // ========================================================================
    // Hook dispatch
    // ========================================================================

    fn run_on_create(&self, ent: &Entity, d: &LockedStores<'_>) -> Result<(), ModelError> {
        match ent {
            Entity::Reservation(r) => models::reservation::on_create(r, d),
            _ => Ok(()),
        }
    }

    fn run_on_change(&self, old: &Entity, new: &Entity) -> Result<(), ModelError> {
        match (old, new) {
            (Entity::Reservation(o), Entity::Reservation(n)) => {
                models::reservation::on_change(o, n)
            }
            (Entity::Lease(o), Entity::Lease(n)) => models::lease::on_change(o, n),
            (Entity::Job(o), Entity::Job(n)) => models::job::on_change(o, n),
            _ => Ok(()),
        }
    }

    fn run_before_save(
        &self,
        ent: &mut Entity,
        old: Option<&Entity>,
        d: &mut LockedStores<'_>,
    ) -> Result<Option<Vec<RenderedTemplate>>, ModelError> {
        let svc = &self.services;
        match ent {
            Entity::BootEnv(b) => models::bootenv::before_save(b, d)?,
            Entity::Job(j) => {
                let old_state = old
                    .and_then(|o| o.as_job())
                    .map(|o| o.state.clone());
                models::job::before_save(j, old_state.as_deref(), self, d, svc)?;
                j.validation.finish(&ModelError::validation(prefix::JOBS, &j.key()));
            }
            Entity::Lease(l) => models::lease::before_save(l, d)?,
            Entity::Machine(m) => {
                models::machine::before_save(m, d, svc)?;
                return Ok(models::machine::validate(m, d, svc));
            }
            Entity::Param(p) => models::param::before_save(p)?,
            Entity::Profile(p) => models::profile::before_save(p, d)?,
            Entity::Reservation(r) => models::reservation::before_save(r, d)?,
            Entity::Subnet(s) => models::subnet::before_save(s)?,
            Entity::Task(t) => models::task::before_save(t, d)?,
            Entity::Template(t) => models::template::before_save(t, d)?,
            Entity::User(u) => models::user::before_save(u, d)?,
        }
        Ok(None)
    }

    fn run_before_delete(&self, ent: &Entity, d: &LockedStores<'_>) -> Result<(), ModelError> {
        match ent {
            Entity::BootEnv(b) => models::bootenv::before_delete(b, d),
            Entity::Job(j) => models::job::before_delete(j),
            Entity::Profile(p) => models::profile::before_delete(p, d),
            Entity::Task(t) => models::task::before_delete(t, d),
            Entity::Template(t) => models::template::before_delete(t, d),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Content layer management and reload
    // ========================================================================

    /// Reload the caches from the current content stack. Takes a full
    /// write lock over every prefix.
    pub fn reload(&self) -> anyhow::Result<()> {
        let mut d = self.registry.lock_all();
        self.reload_into(&mut d)
    }

    /// Swap in a freshly built content stack (SIGHUP) and reload the
    /// caches from it under a full write lock over every prefix.
    pub fn replace_stack(&self, stack: DataStack) -> anyhow::Result<()> {
        stack
            .validate()
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .context("rebuilt content stack failed validation")?;
        let mut d = self.registry.lock_all();
        *self.backend.write() = stack;
        self.reload_into(&mut d)
    }

    /// Add or replace a SAAS content layer, revalidate, and swap the
    /// caches. The displaced layer is disposed of once the new view is
    /// in place.
    pub fn add_replace_saas(
        &self,
        name: &str,
        store: Box<dyn ContentStore>,
    ) -> TrackerResult<()> {
        let mut d = self.registry.lock_all();
        let old = self
            .backend
            .write()
            .add_replace_saas(name, store)
            .map_err(TrackerError::Model)?;
        self.reload_into(&mut d)?;
        if let Some(old) = old {
            if let Err(err) = storage::clean_up_store(old) {
                tracing::warn!(layer = name, error = %err, "failed to clean up replaced content layer");
            }
        }
        Ok(())
    }

    /// Remove a SAAS content layer and swap the caches.
    pub fn remove_saas(&self, name: &str) -> TrackerResult<()> {
        let mut d = self.registry.lock_all();
        let old = self.backend.write().remove_saas(name);
        self.reload_into(&mut d)?;
        if let Some(old) = old {
            if let Err(err) = storage::clean_up_store(old) {
                tracing::warn!(layer = name, error = %err, "failed to clean up removed content layer");
            }
        }
        Ok(())
    }

    /// Add or replace a plugin content layer, revalidate, and swap
    /// the caches.
    pub fn add_replace_plugin(
        &self,
        name: &str,
        store: Box<dyn ContentStore>,
    ) -> TrackerResult<()> {
        let mut d = self.registry.lock_all();
        let old = self
            .backend
            .write()
            .add_replace_plugin(name, store)
            .map_err(TrackerError::Model)?;
        self.reload_into(&mut d)?;
        if let Some(old) = old {
            if let Err(err) = storage::clean_up_store(old) {
                tracing::warn!(layer = name, error = %err, "failed to clean up replaced content layer");
            }
        }
        Ok(())
    }

    /// Remove a plugin content layer and swap the caches.
    pub fn remove_plugin(&self, name: &str) -> TrackerResult<()> {
        let mut d = self.registry.lock_all();
        let old = self.backend.write().remove_plugin(name);
        self.reload_into(&mut d)?;
        if let Some(old) = old {
            if let Err(err) = storage::clean_up_store(old) {
                tracing::warn!(layer = name, error = %err, "failed to clean up removed content layer");
            }
        }
        Ok(())
    }

    fn reload_into(&self, d: &mut LockedStores<'_>) -> anyhow::Result<()> {
        {
            let stack = self.backend.read();
            for pfx in prefix::ALL {
                let mut items = Vec::new();
                for key in stack.keys(pfx)? {
                    let (value, writable) = match stack.load(pfx, &key)? {
                        Some(hit) => hit,
                        None => continue,
                    };
                    match Entity::from_value(pfx, value) {
                        Ok(mut ent) => {
                            ent.validation_mut().read_only = !writable;
                            items.push(ent);
                        }
                        Err(err) => {
                            tracing::error!(prefix = pfx, key = %key, error = %err, "skipping undecodable object");
                        }
                    }
                }
                d.store_mut(pfx).replace_all(items);
            }
        }
        self.validate_all(d);
        Ok(())
    }

    /// Recompute availability for every entity whose availability
    /// depends on other entities. BootEnvs go first so machines see
    /// their final state.
    fn validate_all(&self, d: &mut LockedStores<'_>) {
        let svc = &self.services;

        let mut envs: Vec<Entity> = d.store(prefix::BOOTENVS).items().to_vec();
        for ent in &mut envs {
            if let Entity::BootEnv(b) = ent {
                let mut e = ModelError::validation(prefix::BOOTENVS, &b.name);
                models::bootenv::validate_templates(&mut e, &b.boot_params, &b.templates, d);
                b.validation.finish(&e);
            }
        }
        for ent in envs {
            d.store_mut(prefix::BOOTENVS).insert(ent);
        }

        let mut machines: Vec<Entity> = d.store(prefix::MACHINES).items().to_vec();
        for ent in &mut machines {
            if let Entity::Machine(m) = ent {
                let rendered = models::machine::validate(m, d, svc);
                svc.vfs.deregister_machine(m.uuid);
                if let Some(set) = rendered {
                    render::register_rendered(&svc.vfs, m, &m.boot_env, &set);
                }
            }
        }
        for ent in machines {
            d.store_mut(prefix::MACHINES).insert(ent);
        }
    }
}
