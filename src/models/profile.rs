//! Parameter profiles.
//!
//! A profile is a named bag of parameter values that machines layer
//! into their parameter resolution order. The distinguished `global`
//! profile sits at the bottom of every machine's resolution chain and
//! cannot be deleted.

use super::{prefix, Validation, GLOBAL_PROFILE};
use crate::core::error::ModelError;
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named set of parameter values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Profile {
    #[serde(flatten)]
    pub validation: Validation,
    /// Profile name; `global` is reserved for the global profile.
    pub name: String,
    /// What this profile is for.
    pub description: String,
    /// Parameter values carried by this profile.
    pub params: BTreeMap<String, Value>,
}

impl Profile {
    pub fn key(&self) -> String {
        self.name.clone()
    }

    /// Look up one parameter value.
    pub fn get_param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

pub static INDEXES: [Index; 1] = [Index {
    name: "Name",
    kind: "string",
    unique: true,
    key_of: |e| IndexValue::Str(e.key()),
    parse: index::parse_str,
}];

pub(crate) fn before_save(p: &mut Profile, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::PROFILES, &p.name);
    if p.name.is_empty() {
        e.errorf("Profile must have a name");
        return e.or_ok();
    }
    // Values naming a known Param must satisfy that Param's schema.
    // Failures degrade availability rather than rejecting the save, so
    // content layers can ship profiles ahead of their params.
    let mut avail = ModelError::validation(prefix::PROFILES, &p.name);
    let params = d.store(prefix::PARAMS);
    for (k, v) in &p.params {
        if let Some(param) = params.find(k).and_then(|ent| ent.as_param()) {
            if let Err(msg) = param.validate_value(v) {
                avail.errorf(format!("Key '{k}': invalid value '{v}': {msg}"));
            }
        }
    }
    p.validation.finish(&avail);
    e.or_ok()
}

pub(crate) fn before_delete(p: &Profile, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::still_in_use(prefix::PROFILES, &p.name);
    if p.name == GLOBAL_PROFILE {
        e.errorf(format!(
            "Profile {} is the global profile, you cannot delete it",
            p.name
        ));
    }
    for ent in d.store(prefix::MACHINES).items() {
        if let Some(m) = ent.as_machine() {
            if m.has_profile(&p.name) {
                e.errorf(format!("Machine {} is using profile {}", m.key(), p.name));
            }
        }
    }
    e.or_ok()
}
