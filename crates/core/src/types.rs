use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Analytics event forwarded to whatever sink the host wires in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    /// URL of the page the event originated on.
    pub page_url: String,
    /// Event body, e.g. the correlated submission record.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    FormSubmit,
    FormInteraction,
    DataExported,
    DataCleared,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::FormSubmit => "form_submit",
            EventType::FormInteraction => "form_interaction",
            EventType::DataExported => "data_exported",
            EventType::DataCleared => "data_cleared",
        }
    }
}
