//! Entity model.
//!
//! One module per entity type, plus the shared pieces: the
//! [`Validation`] block every entity embeds, the [`Entity`] sum type
//! the tracker stores, the per-prefix index tables, and the static
//! lock tables that say which prefixes each action needs.

pub mod bootenv;
pub mod job;
pub mod lease;
pub mod machine;
pub mod param;
pub mod profile;
pub mod reservation;
pub mod subnet;
pub mod task;
pub mod template;
pub mod user;

pub use bootenv::{BootEnv, OsInfo, TemplateInfo};
pub use job::{Job, JobAction};
pub use lease::Lease;
pub use machine::Machine;
pub use param::Param;
pub use profile::Profile;
pub use reservation::Reservation;
pub use subnet::Subnet;
pub use task::Task;
pub use template::Template;
pub use user::User;

use crate::core::error::ModelError;
use crate::tracker::index::Index;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;

/// Prefix tags, one per entity type.
pub mod prefix {
    pub const BOOTENVS: &str = "bootenvs";
    pub const JOBS: &str = "jobs";
    pub const LEASES: &str = "leases";
    pub const MACHINES: &str = "machines";
    pub const PARAMS: &str = "params";
    pub const PROFILES: &str = "profiles";
    pub const RESERVATIONS: &str = "reservations";
    pub const SUBNETS: &str = "subnets";
    pub const TASKS: &str = "tasks";
    pub const TEMPLATES: &str = "templates";
    pub const USERS: &str = "users";

    /// Every prefix, in canonical (lexicographic) lock order.
    pub const ALL: [&str; 11] = [
        BOOTENVS,
        JOBS,
        LEASES,
        MACHINES,
        PARAMS,
        PROFILES,
        RESERVATIONS,
        SUBNETS,
        TASKS,
        TEMPLATES,
        USERS,
    ];
}

/// The name of the distinguished global profile.
pub const GLOBAL_PROFILE: &str = "global";

/// Validation state embedded in every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Validation {
    /// Whether a validation pass has run since the last save.
    pub validated: bool,
    /// Whether the last validation pass found no hard errors.
    pub available: bool,
    /// Messages from the last validation pass.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Set on entities materialised from a non-writable content layer.
    /// Read-only entities reject update/save/remove.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

impl Validation {
    /// Record the outcome of a validation pass.
    pub fn finish(&mut self, e: &ModelError) {
        self.errors = e.messages.clone();
        self.available = !e.contains_error();
        self.validated = true;
    }
}

/// A DHCP option attached to a subnet or reservation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DhcpOption {
    /// Option code from RFC 2132.
    pub code: u8,
    /// Option value, rendered to wire format by the DHCP midlayer.
    pub value: String,
}

/// CRUD-ish actions an API caller can take against a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Get,
    Create,
    Update,
    /// Upsert. Locks the union of the create and update sets, since
    /// the tracker runs the create hooks when the key turns out to be
    /// new.
    Save,
    Delete,
    /// Render-driven actions (job actions, machine re-render).
    Actions,
}

/// Every entity the tracker manages.
///
/// Serialization always targets the inner model; the variant tag is
/// recovered from the prefix an object was stored under.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    BootEnv(BootEnv),
    Job(Job),
    Lease(Lease),
    Machine(Machine),
    Param(Param),
    Profile(Profile),
    Reservation(Reservation),
    Subnet(Subnet),
    Task(Task),
    Template(Template),
    User(User),
}

macro_rules! entity_accessors {
    ($($variant:ident, $ty:ty, $as:ident, $as_mut:ident, $into:ident;)*) => {
        impl Entity {
            $(
                #[doc = concat!("Borrow the inner value if this is a ", stringify!($variant), ".")]
                pub fn $as(&self) -> Option<&$ty> {
                    match self {
                        Self::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                #[doc = concat!("Mutably borrow the inner value if this is a ", stringify!($variant), ".")]
                pub fn $as_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Self::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                #[doc = concat!("Take the inner value if this is a ", stringify!($variant), ".")]
                pub fn $into(self) -> Option<$ty> {
                    match self {
                        Self::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            )*
        }
    };
}

entity_accessors! {
    BootEnv, BootEnv, as_bootenv, as_bootenv_mut, into_bootenv;
    Job, Job, as_job, as_job_mut, into_job;
    Lease, Lease, as_lease, as_lease_mut, into_lease;
    Machine, Machine, as_machine, as_machine_mut, into_machine;
    Param, Param, as_param, as_param_mut, into_param;
    Profile, Profile, as_profile, as_profile_mut, into_profile;
    Reservation, Reservation, as_reservation, as_reservation_mut, into_reservation;
    Subnet, Subnet, as_subnet, as_subnet_mut, into_subnet;
    Task, Task, as_task, as_task_mut, into_task;
    Template, Template, as_template, as_template_mut, into_template;
    User, User, as_user, as_user_mut, into_user;
}

impl Entity {
    /// The prefix this entity is stored and locked under.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::BootEnv(_) => prefix::BOOTENVS,
            Self::Job(_) => prefix::JOBS,
            Self::Lease(_) => prefix::LEASES,
            Self::Machine(_) => prefix::MACHINES,
            Self::Param(_) => prefix::PARAMS,
            Self::Profile(_) => prefix::PROFILES,
            Self::Reservation(_) => prefix::RESERVATIONS,
            Self::Subnet(_) => prefix::SUBNETS,
            Self::Task(_) => prefix::TASKS,
            Self::Template(_) => prefix::TEMPLATES,
            Self::User(_) => prefix::USERS,
        }
    }

    /// The unique key within the prefix.
    pub fn key(&self) -> String {
        match self {
            Self::BootEnv(v) => v.key(),
            Self::Job(v) => v.key(),
            Self::Lease(v) => v.key(),
            Self::Machine(v) => v.key(),
            Self::Param(v) => v.key(),
            Self::Profile(v) => v.key(),
            Self::Reservation(v) => v.key(),
            Self::Subnet(v) => v.key(),
            Self::Task(v) => v.key(),
            Self::Template(v) => v.key(),
            Self::User(v) => v.key(),
        }
    }

    /// Shared validation state.
    pub fn validation(&self) -> &Validation {
        match self {
            Self::BootEnv(v) => &v.validation,
            Self::Job(v) => &v.validation,
            Self::Lease(v) => &v.validation,
            Self::Machine(v) => &v.validation,
            Self::Param(v) => &v.validation,
            Self::Profile(v) => &v.validation,
            Self::Reservation(v) => &v.validation,
            Self::Subnet(v) => &v.validation,
            Self::Task(v) => &v.validation,
            Self::Template(v) => &v.validation,
            Self::User(v) => &v.validation,
        }
    }

    /// Shared validation state, mutably.
    pub fn validation_mut(&mut self) -> &mut Validation {
        match self {
            Self::BootEnv(v) => &mut v.validation,
            Self::Job(v) => &mut v.validation,
            Self::Lease(v) => &mut v.validation,
            Self::Machine(v) => &mut v.validation,
            Self::Param(v) => &mut v.validation,
            Self::Profile(v) => &mut v.validation,
            Self::Reservation(v) => &mut v.validation,
            Self::Subnet(v) => &mut v.validation,
            Self::Task(v) => &mut v.validation,
            Self::Template(v) => &mut v.validation,
            Self::User(v) => &mut v.validation,
        }
    }

    /// Serialise the inner model.
    pub fn to_value(&self) -> anyhow::Result<Value> {
        let v = match self {
            Self::BootEnv(v) => serde_json::to_value(v)?,
            Self::Job(v) => serde_json::to_value(v)?,
            Self::Lease(v) => serde_json::to_value(v)?,
            Self::Machine(v) => serde_json::to_value(v)?,
            Self::Param(v) => serde_json::to_value(v)?,
            Self::Profile(v) => serde_json::to_value(v)?,
            Self::Reservation(v) => serde_json::to_value(v)?,
            Self::Subnet(v) => serde_json::to_value(v)?,
            Self::Task(v) => serde_json::to_value(v)?,
            Self::Template(v) => serde_json::to_value(v)?,
            Self::User(v) => serde_json::to_value(v)?,
        };
        Ok(v)
    }

    /// Deserialise an entity stored under `prefix`.
    pub fn from_value(prefix: &str, value: Value) -> anyhow::Result<Self> {
        use self::prefix as p;
        Ok(match prefix {
            p::BOOTENVS => Self::BootEnv(serde_json::from_value(value)?),
            p::JOBS => Self::Job(serde_json::from_value(value)?),
            p::LEASES => Self::Lease(serde_json::from_value(value)?),
            p::MACHINES => Self::Machine(serde_json::from_value(value)?),
            p::PARAMS => Self::Param(serde_json::from_value(value)?),
            p::PROFILES => Self::Profile(serde_json::from_value(value)?),
            p::RESERVATIONS => Self::Reservation(serde_json::from_value(value)?),
            p::SUBNETS => Self::Subnet(serde_json::from_value(value)?),
            p::TASKS => Self::Task(serde_json::from_value(value)?),
            p::TEMPLATES => Self::Template(serde_json::from_value(value)?),
            p::USERS => Self::User(serde_json::from_value(value)?),
            other => anyhow::bail!("unknown prefix {other}"),
        })
    }

    /// Index descriptors for a prefix.
    pub fn indexes(prefix: &str) -> &'static [Index] {
        use self::prefix as p;
        match prefix {
            p::BOOTENVS => &bootenv::INDEXES,
            p::JOBS => &job::INDEXES,
            p::LEASES => &lease::INDEXES,
            p::MACHINES => &machine::INDEXES,
            p::PARAMS => &param::INDEXES,
            p::PROFILES => &profile::INDEXES,
            p::RESERVATIONS => &reservation::INDEXES,
            p::SUBNETS => &subnet::INDEXES,
            p::TASKS => &task::INDEXES,
            p::TEMPLATES => &template::INDEXES,
            p::USERS => &user::INDEXES,
            _ => &[],
        }
    }
}

/// Which prefixes an action on a prefix must lock.
///
/// Encoded as data so lock requirements stay auditable in one place.
/// Every slice is already in canonical (lexicographic) order.
pub fn locks_for(pfx: &str, action: Action) -> &'static [&'static str] {
    use self::prefix as p;
    use self::Action::*;
    match (pfx, action) {
        (p::MACHINES, Get) => &[p::MACHINES],
        // Machine saves render the bootenv, which pulls in params,
        // profiles, tasks, and templates.
        (p::MACHINES, _) => &[
            p::BOOTENVS,
            p::MACHINES,
            p::PARAMS,
            p::PROFILES,
            p::TASKS,
            p::TEMPLATES,
        ],

        (p::BOOTENVS, Get) => &[p::BOOTENVS],
        (p::BOOTENVS, Delete) => &[p::BOOTENVS, p::MACHINES],
        (p::BOOTENVS, _) => &[p::BOOTENVS, p::TEMPLATES],

        (p::TEMPLATES, Delete) => &[p::BOOTENVS, p::TASKS, p::TEMPLATES],
        (p::TEMPLATES, _) => &[p::TEMPLATES],

        (p::PROFILES, Get) => &[p::PROFILES],
        (p::PROFILES, Delete) => &[p::MACHINES, p::PROFILES],
        (p::PROFILES, _) => &[p::PARAMS, p::PROFILES],

        (p::PARAMS, _) => &[p::PARAMS],

        (p::TASKS, Get) => &[p::TASKS],
        (p::TASKS, Delete) => &[p::MACHINES, p::TASKS],
        (p::TASKS, _) => &[p::TASKS, p::TEMPLATES],

        (p::JOBS, Get) | (p::JOBS, Delete) => &[p::JOBS],
        // Job state changes can save the owning machine, so the full
        // machine save lock set rides along.
        (p::JOBS, _) => &[
            p::BOOTENVS,
            p::JOBS,
            p::MACHINES,
            p::PARAMS,
            p::PROFILES,
            p::TASKS,
            p::TEMPLATES,
        ],

        (p::SUBNETS, _) => &[p::SUBNETS],

        // Every mutation needs subnets: creating (or upserting) a
        // reservation checks it against the known subnet ranges.
        (p::RESERVATIONS, Get) => &[p::RESERVATIONS],
        (p::RESERVATIONS, _) => &[p::RESERVATIONS, p::SUBNETS],

        (p::LEASES, Get) | (p::LEASES, Delete) => &[p::LEASES],
        (p::LEASES, _) => &[p::LEASES, p::RESERVATIONS, p::SUBNETS],

        (p::USERS, _) => &[p::USERS],

        _ => &[],
    }
}

/// Record an error unless `addr` is a usable unicast IPv4 address.
pub(crate) fn validate_ip4(e: &mut ModelError, what: &str, addr: Ipv4Addr) {
    if !crate::dhcp::is_global_unicast(addr) {
        e.errorf(format!("{what}: {addr} is not a valid IPv4 address"));
    }
}

/// Like [`validate_ip4`], but absent addresses are fine.
pub(crate) fn validate_maybe_ip4(e: &mut ModelError, what: &str, addr: Option<Ipv4Addr>) {
    if let Some(a) = addr {
        validate_ip4(e, what, a);
    }
}

/// Enforce unique secondary indexes for `ent` against its peers.
///
/// `items` is the full cache slice for the prefix; the entity itself
/// (same primary key) is skipped.
pub(crate) fn check_unique(e: &mut ModelError, ent: &Entity, items: &[Entity]) {
    let key = ent.key();
    for idx in Entity::indexes(ent.prefix()) {
        if !idx.unique {
            continue;
        }
        let want = (idx.key_of)(ent);
        for other in items {
            if other.key() == key {
                continue;
            }
            if (idx.key_of)(other) == want {
                e.errorf(format!(
                    "duplicate {} index value shared with {}",
                    idx.name,
                    other.key()
                ));
            }
        }
    }
}
