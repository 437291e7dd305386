//! Boot environments.
//!
//! A BootEnv describes everything a machine needs to boot into one OS
//! install or runtime state: the OS descriptor, kernel and initrds,
//! the boot-parameter template, and the set of template entries that
//! materialise into boot-time artifacts.

use super::{check_unique, prefix, Entity, Validation};
use crate::core::error::ModelError;
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use serde::{Deserialize, Serialize};

/// OS descriptor carried by a BootEnv.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OsInfo {
    /// OS name; also the directory artifacts for it live under.
    pub name: String,
    /// OS family (e.g. "redhat", "debian").
    pub family: String,
    /// OS version string.
    pub version: String,
    /// Install ISO the file-serving collaborator explodes for us.
    pub iso_file: String,
    /// Where the ISO can be fetched from.
    pub iso_url: String,
    /// Expected ISO checksum.
    pub iso_sha256: String,
}

/// One artifact a BootEnv or Task renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TemplateInfo {
    /// Entry name, unique within the owning object.
    pub name: String,
    /// Template this entry renders.
    #[serde(rename = "ID")]
    pub id: String,
    /// Destination path; itself a template expression.
    pub path: String,
}

/// A bootable environment for machines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BootEnv {
    #[serde(flatten)]
    pub validation: Validation,
    /// Unique name. Must not contain path separators; artifact paths
    /// embed it.
    pub name: String,
    /// What this environment is for.
    pub description: String,
    /// The OS this environment boots.
    #[serde(rename = "OS")]
    pub os: OsInfo,
    /// Kernel path relative to the OS install tree.
    pub kernel: String,
    /// Initrd paths relative to the OS install tree.
    pub initrds: Vec<String>,
    /// Template source for the kernel boot parameters.
    pub boot_params: String,
    /// Parameters that must resolve for rendering to succeed.
    pub required_params: Vec<String>,
    /// Artifacts rendered per machine.
    pub templates: Vec<TemplateInfo>,
    /// Only usable for unknown (unregistered) machines.
    pub only_unknown: bool,
}

impl BootEnv {
    pub fn key(&self) -> String {
        self.name.clone()
    }

    /// Path to a file in this environment's install tree.
    pub fn path_for(&self, proto: &str, file: &str, file_url: &str) -> String {
        let tail = join_path(&self.os.name, file);
        match proto {
            "tftp" => format!("/{tail}"),
            _ => format!("{file_url}/{tail}"),
        }
    }

    /// Space-joined initrd paths, for boot-loader append lines.
    pub fn join_initrds(&self, proto: &str, file_url: &str) -> String {
        self.initrds
            .iter()
            .map(|i| self.path_for(proto, i, file_url))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn join_path(dir: &str, file: &str) -> String {
    let file = file.trim_start_matches('/');
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{dir}/{file}")
    }
}

pub static INDEXES: [Index; 2] = [
    Index {
        name: "Name",
        kind: "string",
        unique: true,
        key_of: |e| IndexValue::Str(e.key()),
        parse: index::parse_str,
    },
    Index {
        name: "OnlyUnknown",
        kind: "boolean",
        unique: false,
        key_of: |e| {
            IndexValue::Bool(e.as_bootenv().map(|b| b.only_unknown).unwrap_or(false))
        },
        parse: index::parse_bool,
    },
];

pub(crate) fn before_save(b: &mut BootEnv, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::BOOTENVS, &b.name);
    if b.name.is_empty() {
        e.errorf("BootEnv must have a name");
    }
    if b.name.contains('/') || b.name.contains('\\') {
        e.errorf(format!("Name must not contain a '/' or '\\': {}", b.name));
    }
    check_unique(&mut e, &Entity::BootEnv(b.clone()), d.store(prefix::BOOTENVS).items());
    e.or_ok()?;

    // Template problems degrade availability instead of rejecting the
    // save, so content layers can carry bootenvs whose templates
    // arrive in another layer.
    let mut avail = ModelError::validation(prefix::BOOTENVS, &b.name);
    validate_templates(&mut avail, &b.boot_params, &b.templates, d);
    b.validation.finish(&avail);
    Ok(())
}

/// Shared by BootEnvs and Tasks: every entry must name a template
/// that exists, the path and body must parse, and entry names must be
/// unique.
pub(crate) fn validate_templates(
    e: &mut ModelError,
    boot_params: &str,
    entries: &[TemplateInfo],
    d: &LockedStores,
) {
    if let Err(err) = crate::render::template::parse(boot_params) {
        e.errorf(format!("Error compiling boot parameter template: {err}"));
    }
    let templates = d.store(prefix::TEMPLATES);
    let mut seen = std::collections::HashSet::new();
    for ti in entries {
        if ti.name.is_empty() {
            e.errorf("Templates must have a Name");
        } else if !seen.insert(ti.name.clone()) {
            e.errorf(format!("Duplicate template name {}", ti.name));
        }
        if let Err(err) = crate::render::template::parse(&ti.path) {
            e.errorf(format!(
                "Error compiling path template {} ({}): {err}",
                ti.name, ti.path
            ));
        }
        match templates.find(&ti.id).and_then(|ent| ent.as_template()) {
            Some(tmpl) => {
                if let Err(err) = crate::render::template::parse(&tmpl.contents) {
                    e.errorf(format!("Error compiling template {}: {err}", ti.id));
                }
            }
            None => e.errorf(format!("Template does not exist: {}", ti.id)),
        }
    }
}

/// BootEnvs still referenced by a machine cannot go away.
pub(crate) fn before_delete(b: &BootEnv, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::still_in_use(prefix::BOOTENVS, &b.name);
    for ent in d.store(prefix::MACHINES).items() {
        if let Some(m) = ent.as_machine() {
            if m.boot_env == b.name {
                e.errorf(format!("Machine {} is using BootEnv {}", m.key(), b.name));
            }
        }
    }
    e.or_ok()
}
