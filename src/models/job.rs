//! Jobs.
//!
//! A job records one run of a task on a machine. The agent drives the
//! state machine: created → running → finished, failed, or incomplete.
//! Failure marks the owning machine not runnable until an operator
//! intervenes.

use super::{prefix, Entity, Validation};
use crate::core::error::ModelError;
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use crate::tracker::{DataTracker, Services};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// States a job can be in.
pub const VALID_STATES: [&str; 5] = ["created", "running", "failed", "finished", "incomplete"];

/// One run of a task on a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Job {
    #[serde(flatten)]
    pub validation: Validation,
    /// Primary key.
    pub uuid: Uuid,
    /// The job that ran before this one on the same machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Uuid>,
    /// UUID of the machine the job runs on.
    pub machine: Uuid,
    /// Name of the task the job runs.
    pub task: String,
    /// BootEnv the machine was in when the job was created.
    pub boot_env: String,
    /// Current state.
    pub state: String,
    /// When the job entered `running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the job entered `failed` or `finished`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Whether the log has been archived off this server.
    pub archived: bool,
    /// Filesystem path to the job log.
    pub log_path: String,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            validation: Validation::default(),
            uuid: Uuid::nil(),
            previous: None,
            machine: Uuid::nil(),
            task: String::new(),
            boot_env: String::new(),
            state: "created".to_string(),
            start_time: None,
            end_time: None,
            archived: false,
            log_path: String::new(),
        }
    }
}

impl Job {
    pub fn key(&self) -> String {
        self.uuid.to_string()
    }

    /// Append to the job log, creating it on first use.
    pub fn log(&self, src: &str) -> std::io::Result<()> {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        f.write_all(src.as_bytes())
    }
}

/// An action the job runner executes: placed when `path` is set,
/// executed otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct JobAction {
    /// Template entry name this action came from.
    pub name: String,
    /// Destination path; empty means execute the content.
    pub path: String,
    /// Rendered content.
    pub content: String,
}

pub static INDEXES: [Index; 6] = [
    Index {
        name: "Uuid",
        kind: "UUID string",
        unique: true,
        key_of: |e| IndexValue::Uuid(e.as_job().map(|j| j.uuid).unwrap_or_else(Uuid::nil)),
        parse: index::parse_uuid,
    },
    Index {
        name: "Machine",
        kind: "UUID string",
        unique: false,
        key_of: |e| IndexValue::Uuid(e.as_job().map(|j| j.machine).unwrap_or_else(Uuid::nil)),
        parse: index::parse_uuid,
    },
    Index {
        name: "Task",
        kind: "string",
        unique: false,
        key_of: |e| IndexValue::Str(e.as_job().map(|j| j.task.clone()).unwrap_or_default()),
        parse: index::parse_str,
    },
    Index {
        name: "State",
        kind: "string",
        unique: false,
        key_of: |e| IndexValue::Str(e.as_job().map(|j| j.state.clone()).unwrap_or_default()),
        parse: index::parse_str,
    },
    Index {
        name: "Archived",
        kind: "boolean",
        unique: false,
        key_of: |e| IndexValue::Bool(e.as_job().map(|j| j.archived).unwrap_or(false)),
        parse: index::parse_bool,
    },
    Index {
        name: "StartTime",
        kind: "dateTime",
        unique: false,
        key_of: |e| {
            IndexValue::Time(
                e.as_job()
                    .and_then(|j| j.start_time)
                    .unwrap_or(DateTime::UNIX_EPOCH),
            )
        },
        parse: index::parse_time,
    },
];

pub(crate) fn on_change(old: &Job, new: &Job) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::JOBS, &new.key());
    if new.machine != old.machine {
        e.errorf("Machine cannot change");
    }
    e.or_ok()
}

pub(crate) fn before_save(
    j: &mut Job,
    old_state: Option<&str>,
    dt: &DataTracker,
    d: &mut LockedStores,
    svc: &Services,
) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::JOBS, &j.key());
    if j.uuid.is_nil() {
        e.errorf("Job was not assigned a uuid");
    }

    let machine = d
        .store(prefix::MACHINES)
        .find(&j.machine.to_string())
        .and_then(|ent| ent.as_machine())
        .cloned();
    if machine.is_none() {
        e.errorf(format!("Machine {} does not exist", j.machine));
    }
    if d.store(prefix::TASKS).find(&j.task).is_none() {
        e.errorf(format!("Task {} does not exist", j.task));
    }
    match d
        .store(prefix::BOOTENVS)
        .find(&j.boot_env)
        .and_then(|ent| ent.as_bootenv())
    {
        None => e.errorf(format!("Bootenv {} does not exist", j.boot_env)),
        Some(env) if !env.validation.available => {
            e.errorf(format!(
                "Job {} wants BootEnv {}, which is not available",
                j.key(),
                j.boot_env
            ));
        }
        Some(_) => {}
    }
    if !VALID_STATES.contains(&j.state.as_str()) {
        e.errorf(format!("Job {} wants State {}, which is not valid", j.key(), j.state));
    }

    if j.log_path.is_empty() && !e.contains_error() {
        j.log_path = svc
            .log_root
            .join(j.uuid.to_string())
            .to_string_lossy()
            .into_owned();
        if let Err(err) = j.log(&format!("Log for Job: {}\n", j.uuid)) {
            e.errorf(format!("Failed to create log {}: {err}", j.log_path));
        }
    }

    e.or_ok()?;

    // State transition side effects.
    if old_state != Some(j.state.as_str()) {
        if j.state == "running" {
            j.start_time = Some(Utc::now());
        }
        if j.state == "failed" || j.state == "finished" {
            j.end_time = Some(Utc::now());
        }
        if j.state == "failed" {
            // The machine stops being runnable until someone looks at
            // the failure. Saved through the same lock set; the nested
            // save emits its own event.
            if let Some(mut m) = machine {
                m.runnable = false;
                let mut e = ModelError::validation(prefix::JOBS, &j.key());
                if let Err(err) = dt.save(d, Entity::Machine(m)) {
                    e.merge_msg(err);
                    return e.or_ok();
                }
            }
        }
    }
    Ok(())
}

/// Render this job's task into the actions the agent will place or
/// execute. The lock set must cover the job-actions table entry.
pub fn render_actions(
    j: &Job,
    d: &LockedStores,
    svc: &Services,
) -> Result<Vec<JobAction>, ModelError> {
    let mut e = ModelError::validation(prefix::JOBS, &j.key());
    let machine = match d
        .store(prefix::MACHINES)
        .find(&j.machine.to_string())
        .and_then(|ent| ent.as_machine())
    {
        Some(m) => m.clone(),
        None => {
            e.errorf(format!("Machine {} does not exist", j.machine));
            return Err(e);
        }
    };
    let task = match d.store(prefix::TASKS).find(&j.task).and_then(|ent| ent.as_task()) {
        Some(t) => t.clone(),
        None => {
            e.errorf(format!("Task {} does not exist", j.task));
            return Err(e);
        }
    };
    let env = d
        .store(prefix::BOOTENVS)
        .find(&j.boot_env)
        .and_then(|ent| ent.as_bootenv())
        .cloned();
    crate::render::render_task(d, svc, &machine, env.as_ref(), &task)
}

/// Only terminal jobs can be deleted.
pub(crate) fn before_delete(j: &Job) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::JOBS, &j.key());
    if j.state != "finished" && j.state != "failed" {
        e.errorf(format!("Job {} is not in a deletable state: {}", j.key(), j.state));
    }
    e.or_ok()
}
