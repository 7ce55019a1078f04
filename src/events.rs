//! Audit event stream
//!
//! One event per saga state transition, handed to an injected sink for
//! external persistence. Publishing is fire-and-forget: a sink failure
//! is logged and never blocks or fails a transfer.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub transfer_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub note: Option<String>,
    pub ts_ms: i64,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: AuditEvent) -> Result<(), String>;
}

/// Default sink: writes transitions to the application log.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: AuditEvent) -> Result<(), String> {
        log::info!(
            "audit: transfer {} {} -> {}{}",
            event.transfer_id,
            event.from_status.as_deref().unwrap_or("-"),
            event.to_status,
            event
                .note
                .as_deref()
                .map(|n| format!(" ({})", n))
                .unwrap_or_default()
        );
        Ok(())
    }
}

/// Captures events in memory so tests can assert on transitions.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: AuditEvent) -> Result<(), String> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sink_captures() {
        let sink = RecordingEventSink::new();
        sink.publish(AuditEvent {
            transfer_id: "t-1".to_string(),
            from_status: None,
            to_status: "pending".to_string(),
            note: None,
            ts_ms: 0,
        })
        .await
        .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to_status, "pending");
    }
}
