//! Event publishing.
//!
//! Every successful CRUD operation emits one event: the prefix, the
//! action, the object key, and the object itself. Subscribers get
//! events sequentially; a failing subscriber is logged and skipped so
//! it can neither block the others nor fail the producing operation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// An action in the system, of the form `type.action.key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    /// When the event happened.
    pub time: DateTime<Utc>,
    /// Object type (the prefix).
    #[serde(rename = "Type")]
    pub event_type: String,
    /// What happened: create, update, save, delete.
    pub action: String,
    /// Key of the object.
    pub key: String,
    /// The object itself.
    pub object: Value,
}

impl Event {
    /// Build an event stamped now.
    pub fn new(event_type: &str, action: &str, key: &str, object: Value) -> Self {
        Self {
            time: Utc::now(),
            event_type: event_type.to_string(),
            action: action.to_string(),
            key: key.to_string(),
            object,
        }
    }

    /// One-line text form for logs.
    pub fn text(&self) -> String {
        format!(
            "{}: {} {} {}",
            self.time.timestamp(),
            self.event_type,
            self.action,
            self.key
        )
    }
}

/// Something that wants to hear about events.
pub trait Publisher: Send + Sync {
    /// Handle one event. Errors are logged by the fan-out and do not
    /// propagate.
    fn publish(&self, event: &Event) -> Result<(), String>;
}

/// The subscriber registry and fan-out point.
#[derive(Default)]
pub struct Publishers {
    subs: Mutex<Vec<Arc<dyn Publisher>>>,
}

impl Publishers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn add(&self, sub: Arc<dyn Publisher>) {
        self.subs.lock().push(sub);
    }

    /// Remove a subscriber by pointer identity.
    pub fn remove(&self, sub: &Arc<dyn Publisher>) {
        self.subs.lock().retain(|s| !Arc::ptr_eq(s, sub));
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    /// Whether no subscribers are registered.
    pub fn is_empty(&self) -> bool {
        self.subs.lock().is_empty()
    }

    /// Emit one event to every subscriber, in registration order.
    pub fn publish(&self, event: &Event) {
        let subs: Vec<Arc<dyn Publisher>> = self.subs.lock().clone();
        for sub in subs {
            if let Err(err) = sub.publish(event) {
                tracing::warn!(
                    event = %event.text(),
                    error = %err,
                    "event subscriber failed"
                );
            }
        }
    }
}
