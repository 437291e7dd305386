//! Error types shared across the control plane.
//!
//! Two layers of error live here. `ModelError` is the accumulating
//! validation error that entity hooks build up: it carries the model
//! prefix, the object key, a type tag, and every message collected
//! during a validation pass. `TrackerError` is the operational error
//! the data tracker returns from CRUD calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type tag for a validation failure.
pub const VALIDATION_ERROR: &str = "ValidationError";
/// Type tag for a deletion refused by referential integrity.
pub const STILL_IN_USE_ERROR: &str = "StillInUseError";
/// Type tag for a template parse or execute failure.
pub const TEMPLATE_RENDER_ERROR: &str = "TemplateRenderError";

/// Accumulating error for a single entity operation.
///
/// Hooks call [`ModelError::errorf`] as they find problems; the
/// operation checks [`ModelError::or_ok`] at the end. A `ModelError`
/// that never collected a message is not an error, it is the record
/// of a validation pass that found nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelError {
    /// Model prefix the error is about (e.g. "machines").
    pub model: String,
    /// Key of the object the error is about.
    pub key: String,
    /// Error type tag (one of the `*_ERROR` constants).
    #[serde(rename = "Type")]
    pub type_tag: String,
    /// Collected messages.
    pub messages: Vec<String>,
    /// HTTP-ish status code for the API layer.
    #[serde(skip)]
    pub code: u16,
    #[serde(skip)]
    contains_error: bool,
}

impl ModelError {
    /// Create an empty error for a model/key pair.
    pub fn new(type_tag: &str, code: u16, model: &str, key: &str) -> Self {
        Self {
            model: model.to_string(),
            key: key.to_string(),
            type_tag: type_tag.to_string(),
            messages: Vec::new(),
            code,
            contains_error: false,
        }
    }

    /// Create a validation error (code 422) for a model/key pair.
    pub fn validation(model: &str, key: &str) -> Self {
        Self::new(VALIDATION_ERROR, 422, model, key)
    }

    /// Create a still-in-use error (code 422) for a model/key pair.
    pub fn still_in_use(model: &str, key: &str) -> Self {
        Self::new(STILL_IN_USE_ERROR, 422, model, key)
    }

    /// Record a problem.
    pub fn errorf(&mut self, msg: impl Into<String>) {
        self.contains_error = true;
        self.messages.push(msg.into());
    }

    /// Fold another error's messages into this one.
    pub fn merge(&mut self, other: &ModelError) {
        if other.contains_error {
            self.contains_error = true;
            self.messages.extend(other.messages.iter().cloned());
        }
    }

    /// Fold a plain error message into this one.
    pub fn merge_msg(&mut self, err: impl std::fmt::Display) {
        self.contains_error = true;
        self.messages.push(err.to_string());
    }

    /// Whether any problem was recorded.
    pub fn contains_error(&self) -> bool {
        self.contains_error
    }

    /// `Ok(())` if nothing was recorded, the error otherwise.
    pub fn or_ok(self) -> Result<(), ModelError> {
        if self.contains_error {
            Err(self)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.key.is_empty() {
            writeln!(f, "{}/{}: {}", self.model, self.key, self.type_tag)?;
        } else if !self.model.is_empty() {
            writeln!(f, "{}: {}", self.model, self.type_tag)?;
        } else {
            writeln!(f, "{}", self.type_tag)?;
        }
        write!(f, "{}", self.messages.join("\n"))
    }
}

impl std::error::Error for ModelError {}

/// Operational errors returned by the data tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Create was handed an entity with an empty key.
    #[error("{prefix}: empty key not allowed")]
    EmptyKey { prefix: &'static str },

    /// Create found the key already present.
    #[error("{prefix}: {key} already exists")]
    AlreadyExists { prefix: &'static str, key: String },

    /// Update or remove could not find the key.
    #[error("{prefix}: {key} does not exist")]
    NotFound { prefix: &'static str, key: String },

    /// The target came from a non-writable content layer.
    #[error("{prefix}: {key} is read-only")]
    ReadOnly { prefix: &'static str, key: String },

    /// A hook rejected the operation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The persistent store failed; the cache was not touched.
    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl TrackerError {
    /// HTTP-ish status code for the API layer.
    pub fn code(&self) -> u16 {
        match self {
            Self::EmptyKey { .. } => 400,
            Self::AlreadyExists { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::ReadOnly { .. } => 403,
            Self::Model(e) => e.code,
            Self::Storage(_) => 500,
        }
    }
}

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;
