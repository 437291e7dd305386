//! Machines.
//!
//! A machine is one bare-metal system whose boot environment we
//! manage. Its parameter bag, profile list, and task list drive
//! rendering and job execution; its BootEnv reference decides which
//! artifacts the renderer materialises for it.

use super::{check_unique, prefix, validate_maybe_ip4, Entity, Validation};
use crate::core::error::ModelError;
use crate::dhcp::hexaddr;
use crate::render::{self, RenderedTemplate};
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use crate::tracker::Services;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A managed bare-metal system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Machine {
    #[serde(flatten)]
    pub validation: Validation,
    /// Machine name, unique across all machines. Conventionally the
    /// FQDN, though nothing enforces that.
    pub name: String,
    /// Reference information for humans.
    pub description: String,
    /// Primary key, assigned at create and immutable afterwards.
    pub uuid: Uuid,
    /// Address used for PXE purposes. Rendering relies on this, not on
    /// any lease or reservation state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,
    /// BootEnv to boot into. Empty means the configured default.
    pub boot_env: String,
    /// Profiles consulted, in order, during parameter resolution.
    pub profiles: Vec<String>,
    /// Machine-local parameter values. First stop in resolution.
    pub params: BTreeMap<String, Value>,
    /// Tasks this machine runs, in order.
    pub tasks: Vec<String>,
    /// Index into `tasks` of the task jobs are created for.
    pub current_task: i64,
    /// Whether jobs may be created for this machine. Cleared when a
    /// job fails.
    pub runnable: bool,
    /// The most recent job created for this machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job: Option<Uuid>,
}

impl Machine {
    pub fn key(&self) -> String {
        self.uuid.to_string()
    }

    /// Address in raw hexadecimal, as pxelinux and elilo expect.
    pub fn hex_address(&self) -> String {
        self.address.map(hexaddr).unwrap_or_default()
    }

    /// Name up to the first dot.
    pub fn short_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Path of this machine's rendered tree in the virtual filesystem.
    pub fn path(&self) -> String {
        format!("{}/{}", prefix::MACHINES, self.uuid)
    }

    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p == name)
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t == name)
    }
}

pub static INDEXES: [Index; 4] = [
    Index {
        name: "Uuid",
        kind: "UUID string",
        unique: true,
        key_of: |e| {
            IndexValue::Uuid(e.as_machine().map(|m| m.uuid).unwrap_or_else(Uuid::nil))
        },
        parse: index::parse_uuid,
    },
    Index {
        name: "Name",
        kind: "string",
        unique: true,
        key_of: |e| {
            IndexValue::Str(e.as_machine().map(|m| m.name.clone()).unwrap_or_default())
        },
        parse: index::parse_str,
    },
    Index {
        name: "BootEnv",
        kind: "string",
        unique: false,
        key_of: |e| {
            IndexValue::Str(
                e.as_machine()
                    .map(|m| m.boot_env.clone())
                    .unwrap_or_default(),
            )
        },
        parse: index::parse_str,
    },
    Index {
        name: "Address",
        kind: "IP Address",
        unique: false,
        key_of: |e| {
            IndexValue::Ip(
                e.as_machine()
                    .and_then(|m| m.address)
                    .map(u32::from)
                    .unwrap_or(0),
            )
        },
        parse: index::parse_ip,
    },
];

pub(crate) fn before_save(
    m: &mut Machine,
    d: &LockedStores,
    svc: &Services,
) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::MACHINES, &m.key());
    if m.uuid.is_nil() {
        e.errorf("Machine was not assigned a uuid");
    }
    if m.name.is_empty() {
        e.errorf(format!("Machine {} must have a name", m.uuid));
    }
    if m.boot_env.is_empty() {
        m.boot_env = svc.default_boot_env.clone();
    }
    validate_maybe_ip4(&mut e, "Address", m.address);
    check_unique(&mut e, &Entity::Machine(m.clone()), d.store(prefix::MACHINES).items());
    e.or_ok()
}

/// Availability pass: check the machine's references and render its
/// artifacts. Runs under the save's lock set, after the structural
/// hooks and before persist, so `available` lands in the stored
/// document. Returns the rendered set to register once the save
/// commits.
pub(crate) fn validate(
    m: &mut Machine,
    d: &LockedStores,
    svc: &Services,
) -> Option<Vec<RenderedTemplate>> {
    let mut e = ModelError::validation(prefix::MACHINES, &m.key());

    let profiles = d.store(prefix::PROFILES);
    let mut wanted: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, name) in m.profiles.iter().enumerate() {
        if profiles.find(name).is_none() {
            e.errorf(format!("Profile {name} (at {i}) does not exist"));
        } else if let Some(prev) = wanted.insert(name.as_str(), i) {
            e.errorf(format!("Duplicate profile {name}: at {prev} and {i}"));
        }
    }

    let tasks = d.store(prefix::TASKS);
    for (i, name) in m.tasks.iter().enumerate() {
        if tasks.find(name).is_none() {
            e.errorf(format!("Task {name} (at {i}) does not exist"));
        }
    }

    let env = d
        .store(prefix::BOOTENVS)
        .find(&m.boot_env)
        .and_then(|ent| ent.as_bootenv())
        .cloned();
    let mut rendered = None;
    match env {
        None => e.errorf(format!("Bootenv {} does not exist", m.boot_env)),
        Some(env) => {
            if env.only_unknown {
                e.errorf(format!(
                    "BootEnv {} does not allow Machine assignments, it has the OnlyUnknown flag",
                    env.name
                ));
            }
            if !env.validation.available {
                e.errorf(format!(
                    "Machine {} wants BootEnv {}, which is not available",
                    m.key(),
                    m.boot_env
                ));
            }
            if !e.contains_error() {
                match render::render_machine(d, svc, m, &env) {
                    Ok(set) => rendered = Some(set),
                    Err(rerr) => e.merge(&rerr),
                }
            }
        }
    }

    m.validation.finish(&e);
    rendered
}
