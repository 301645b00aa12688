use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One recorded mutation, emitted after a write or method call succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    /// Authenticated user, when the call came through the permission filter.
    pub user: Option<String>,
    /// The touched resource (parameter path or id in textual form).
    pub resource: String,
    pub change: String,
}

impl ChangeEvent {
    pub fn new(user: Option<String>, resource: impl Into<String>, change: impl Into<String>) -> Self {
        ChangeEvent {
            id: Uuid::new_v4(),
            at: Utc::now(),
            user,
            resource: resource.into(),
            change: change.into(),
        }
    }
}

pub trait ChangeSink: Send + Sync {
    fn record(&self, event: ChangeEvent);
}

/// Discards everything; the default sink.
#[derive(Debug, Default)]
pub struct NullChangeSink;

impl ChangeSink for NullChangeSink {
    fn record(&self, _event: ChangeEvent) {}
}

/// Keeps events in memory for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingChangeSink {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingChangeSink {
    pub fn new() -> Self {
        RecordingChangeSink::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ChangeSink for RecordingChangeSink {
    fn record(&self, event: ChangeEvent) {
        self.events.lock().unwrap().push(event);
    }
}
