//! Boot artifact templates.

use super::{check_unique, prefix, Entity, Validation};
use crate::core::error::{ModelError, TEMPLATE_RENDER_ERROR};
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use serde::{Deserialize, Serialize};

/// A reusable template body, referenced by BootEnvs and Tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Template {
    #[serde(flatten)]
    pub validation: Validation,
    /// Unique identifier referenced from template entries.
    #[serde(rename = "ID")]
    pub id: String,
    /// What this template is for.
    pub description: String,
    /// The template source itself.
    pub contents: String,
}

impl Template {
    pub fn key(&self) -> String {
        self.id.clone()
    }
}

pub static INDEXES: [Index; 1] = [Index {
    name: "ID",
    kind: "string",
    unique: true,
    key_of: |e| IndexValue::Str(e.key()),
    parse: index::parse_str,
}];

pub(crate) fn before_save(t: &mut Template, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::TEMPLATES, &t.id);
    if t.id.is_empty() {
        e.errorf("Template must have an ID");
    }
    if let Err(perr) = crate::render::template::parse(&t.contents) {
        let mut te = ModelError::new(TEMPLATE_RENDER_ERROR, 422, prefix::TEMPLATES, &t.id);
        te.errorf(format!("Parse error: {perr}"));
        e.merge(&te);
    }
    check_unique(&mut e, &Entity::Template(t.clone()), d.store(prefix::TEMPLATES).items());
    if !e.contains_error() {
        t.validation.finish(&e);
    }
    e.or_ok()
}

/// Templates still referenced by a BootEnv or Task cannot go away.
pub(crate) fn before_delete(t: &Template, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::still_in_use(prefix::TEMPLATES, &t.id);
    for ent in d.store(prefix::BOOTENVS).items() {
        if let Some(env) = ent.as_bootenv() {
            if env.templates.iter().any(|ti| ti.id == t.id) {
                e.errorf(format!("BootEnv {} is using template {}", env.name, t.id));
            }
        }
    }
    for ent in d.store(prefix::TASKS).items() {
        if let Some(task) = ent.as_task() {
            if task.templates.iter().any(|ti| ti.id == t.id) {
                e.errorf(format!("Task {} is using template {}", task.name, t.id));
            }
        }
    }
    e.or_ok()
}
