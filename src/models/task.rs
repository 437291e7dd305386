//! Tasks.
//!
//! A task is a set of template entries a job renders for its machine;
//! the agent on the machine places or executes each rendered action.

use super::bootenv::{validate_templates, TemplateInfo};
use super::{check_unique, prefix, Entity, Validation};
use crate::core::error::ModelError;
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use serde::{Deserialize, Serialize};

/// A unit of work machines run through jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Task {
    #[serde(flatten)]
    pub validation: Validation,
    /// Unique task name.
    pub name: String,
    /// What this task does.
    pub description: String,
    /// Parameters that must resolve for rendering to succeed.
    pub required_params: Vec<String>,
    /// Actions rendered per machine. Entries with a Path are placed;
    /// entries without one are executed.
    pub templates: Vec<TemplateInfo>,
}

impl Task {
    pub fn key(&self) -> String {
        self.name.clone()
    }
}

pub static INDEXES: [Index; 1] = [Index {
    name: "Name",
    kind: "string",
    unique: true,
    key_of: |e| IndexValue::Str(e.key()),
    parse: index::parse_str,
}];

pub(crate) fn before_save(t: &mut Task, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::TASKS, &t.name);
    if t.name.is_empty() {
        e.errorf("Task must have a name");
    }
    check_unique(&mut e, &Entity::Task(t.clone()), d.store(prefix::TASKS).items());
    e.or_ok()?;

    let mut avail = ModelError::validation(prefix::TASKS, &t.name);
    validate_templates(&mut avail, "", &t.templates, d);
    t.validation.finish(&avail);
    Ok(())
}

/// Tasks still referenced by a machine cannot go away.
pub(crate) fn before_delete(t: &Task, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::still_in_use(prefix::TASKS, &t.name);
    for ent in d.store(prefix::MACHINES).items() {
        if let Some(m) = ent.as_machine() {
            if m.has_task(&t.name) {
                e.errorf(format!("Machine {} is using task {}", m.key(), t.name));
            }
        }
    }
    e.or_ok()
}
