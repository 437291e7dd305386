//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;` in
//! test files.

#![allow(dead_code)]

use anvil::events::Publishers;
use anvil::models::{
    BootEnv, Entity, Lease, Machine, Profile, Reservation, Subnet, Template, TemplateInfo,
};
use anvil::storage::memory::MemoryStore;
use anvil::storage::stack::DataStack;
use anvil::storage::{ContentStore, StoreMetadata};
use anvil::tracker::{DataTracker, Services};
use chrono::{DateTime, Duration, Utc};
use std::net::Ipv4Addr;
use std::sync::Arc;
use uuid::Uuid;

/// A memory store carrying a metadata Name.
pub fn mem_store(name: &str) -> Box<dyn ContentStore> {
    Box::new(MemoryStore::with_metadata(StoreMetadata {
        name: name.to_string(),
        ..Default::default()
    }))
}

/// A stack with a writable memory store and a basic layer.
pub fn mem_stack() -> DataStack {
    DataStack::new(
        mem_store("BackingStore"),
        None,
        None,
        mem_store("BasicStore"),
    )
}

/// A tracker over in-memory storage with default services.
pub fn mk_tracker() -> DataTracker {
    DataTracker::new(mem_stack(), Services::default(), Arc::new(Publishers::new())).unwrap()
}

/// A tracker with a caller-supplied stack and services.
pub fn mk_tracker_with(stack: DataStack, services: Services) -> DataTracker {
    DataTracker::new(stack, services, Arc::new(Publishers::new())).unwrap()
}

/// A machine named `name` using `boot_env`, with a fresh UUID.
pub fn machine(name: &str, boot_env: &str) -> Machine {
    Machine {
        name: name.to_string(),
        uuid: Uuid::new_v4(),
        boot_env: boot_env.to_string(),
        address: Some(Ipv4Addr::new(192, 168, 124, 11)),
        runnable: true,
        ..Default::default()
    }
}

/// A template with literal contents.
pub fn template(id: &str, contents: &str) -> Template {
    Template {
        id: id.to_string(),
        contents: contents.to_string(),
        ..Default::default()
    }
}

/// A bootenv rendering one template to `machines/{{.Machine.UUID}}/file`.
pub fn bootenv(name: &str, template_id: &str) -> BootEnv {
    BootEnv {
        name: name.to_string(),
        boot_params: "{{.Env.Name}}".to_string(),
        templates: vec![TemplateInfo {
            name: "ipxe".to_string(),
            id: template_id.to_string(),
            path: "machines/{{.Machine.UUID}}/file".to_string(),
        }],
        ..Default::default()
    }
}

/// A profile with one parameter value.
pub fn profile(name: &str, key: &str, value: &str) -> Profile {
    let mut p = Profile {
        name: name.to_string(),
        ..Default::default()
    };
    p.params.insert(key.to_string(), serde_json::json!(value));
    p
}

/// The canonical test subnet: 192.168.124.0/24, active .80-.254.
pub fn subnet_124(strategy: &str) -> Subnet {
    Subnet {
        name: "test".to_string(),
        subnet: "192.168.124.0/24".to_string(),
        active_start: Some(Ipv4Addr::new(192, 168, 124, 80)),
        active_end: Some(Ipv4Addr::new(192, 168, 124, 254)),
        active_lease_time: 60,
        reserved_lease_time: 7200,
        strategy: strategy.to_string(),
        ..Default::default()
    }
}

/// A reservation binding an address to a client identity.
pub fn reservation(addr: Ipv4Addr, strategy: &str, token: &str) -> Reservation {
    Reservation {
        addr,
        strategy: strategy.to_string(),
        token: token.to_string(),
        ..Default::default()
    }
}

/// A lease with an explicit expiry.
pub fn lease(addr: Ipv4Addr, strategy: &str, token: &str, expire: DateTime<Utc>) -> Lease {
    Lease {
        addr,
        strategy: strategy.to_string(),
        token: token.to_string(),
        expire_time: expire,
        ..Default::default()
    }
}

/// An expiry comfortably in the future.
pub fn fresh() -> DateTime<Utc> {
    Utc::now() + Duration::minutes(10)
}

/// An expiry comfortably in the past.
pub fn expired() -> DateTime<Utc> {
    Utc::now() - Duration::minutes(10)
}

/// Create template, bootenv, and machine in one go; returns the
/// machine as saved.
pub fn seed_machine(dt: &DataTracker, name: &str) -> Machine {
    let mut d = dt.lock_all();
    dt.create(&mut d, Entity::Template(template("ok", "content")))
        .unwrap();
    dt.create(&mut d, Entity::BootEnv(bootenv("available", "ok")))
        .unwrap();
    dt.create(&mut d, Entity::Machine(machine(name, "available")))
        .unwrap()
        .into_machine()
        .unwrap()
}
