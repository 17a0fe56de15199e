//! Analytics event bus — the forwarding seam for tracker events.
//!
//! The tracker accepts an `Arc<dyn EventSink>` and emits page views, form
//! submissions and interaction signals into it. No backend ships with the
//! crate; hosts plug in their own sink.

use crate::types::{AnalyticsEvent, EventType};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Trait for forwarding analytics events to an external sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AnalyticsEvent);
}

/// No-op sink; the default until a host wires an analytics backend.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: AnalyticsEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: AnalyticsEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating `AnalyticsEvent` with minimal boilerplate.
pub fn make_event(
    event_type: EventType,
    page_url: impl Into<String>,
    payload: serde_json::Value,
) -> AnalyticsEvent {
    AnalyticsEvent {
        event_id: Uuid::new_v4(),
        event_type,
        page_url: page_url.into(),
        payload,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for hosts without analytics.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.emit(make_event(
            EventType::PageView,
            "https://example.com/",
            serde_json::Value::Null,
        ));
        sink.emit(make_event(
            EventType::FormSubmit,
            "https://example.com/vote",
            serde_json::json!({"name": "Alice"}),
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(EventType::PageView), 1);
        assert_eq!(sink.count_type(EventType::FormSubmit), 1);

        let events = sink.events();
        assert_eq!(events[0].page_url, "https://example.com/");
        assert_eq!(events[1].payload["name"], "Alice");
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event(
            EventType::DataCleared,
            "https://example.com/",
            serde_json::Value::Null,
        ));
    }
}
