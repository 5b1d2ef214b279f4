//! Fan-out of operator-visible log events to WebSocket observers.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl EventLevel {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Error
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub id: Uuid,
    pub hall_id: String,
    pub message: String,
    pub level: EventLevel,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Arc<LogEvent>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LogEvent>> {
        self.sender.subscribe()
    }

    pub fn emit(&self, hall_id: &str, message: impl Into<String>, level: EventLevel) {
        let event = LogEvent {
            id: Uuid::new_v4(),
            hall_id: hall_id.to_string(),
            message: message.into(),
            level,
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        };
        tracing::info!(hall = %event.hall_id, level = ?event.level, "{}", event.message);
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }
}
