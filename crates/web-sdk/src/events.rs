//! Page-side records and the inbound message boundary — page views, form
//! submissions correlated with the campaign snapshot, and the cross-frame
//! messages and clicks the tracker listens for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use utm_core::{TrackerError, TrackerResult};

use crate::snapshot::CampaignSnapshot;

/// What the browsing environment tells the tracker about the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    /// Full URL of the page, query string included.
    pub url: String,
    /// Referring URL; empty when the visit was direct.
    pub referrer: String,
    pub user_agent: String,
}

impl PageContext {
    pub fn new(
        url: impl Into<String>,
        referrer: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            referrer: referrer.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// One page load, appended to the page-view log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewRecord {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub user_agent: String,
}

impl PageViewRecord {
    pub fn from_context(ctx: &PageContext, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            url: ctx.url.clone(),
            referrer: ctx.referrer.clone(),
            user_agent: ctx.user_agent.clone(),
        }
    }
}

/// A form submission: the caller's fields with the snapshot and submission
/// time layered on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub utm: Option<CampaignSnapshot>,
    pub submission_time: DateTime<Utc>,
}

impl SubmissionRecord {
    /// Merge the snapshot into a submission payload. Caller fields named
    /// `utm` or `submissionTime` are replaced.
    pub fn correlate(
        payload: FormPayload,
        utm: Option<CampaignSnapshot>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut fields = payload.fields;
        fields.remove("utm");
        fields.remove("submissionTime");
        Self {
            fields,
            utm,
            submission_time: now,
        }
    }
}

/// Opaque caller-defined fields of a submission message, discriminator removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormPayload {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A cross-frame message after boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Embedded form reported a submission.
    FormSubmit(FormPayload),
    /// Well-formed message for someone else.
    Other { kind: String },
}

impl InboundMessage {
    /// Validate raw message data. Only JSON objects with a string `type`
    /// field are messages; `submit_type` selects the submission variant.
    pub fn parse(data: &Value, submit_type: &str) -> TrackerResult<Self> {
        let obj = data
            .as_object()
            .ok_or_else(|| TrackerError::InvalidMessage("payload is not an object".into()))?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackerError::InvalidMessage("missing string `type` field".into()))?;

        if kind != submit_type {
            return Ok(Self::Other {
                kind: kind.to_string(),
            });
        }

        let mut fields = obj.clone();
        fields.remove("type");
        Ok(Self::FormSubmit(FormPayload { fields }))
    }
}

/// Everything the page can deliver to the tracker's listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// Data posted to the window's message channel.
    Message(Value),
    /// A click, identified by the tag name of its target element.
    Click { target_tag: String },
}

impl PageEvent {
    pub fn click(target_tag: impl Into<String>) -> Self {
        Self::Click {
            target_tag: target_tag.into(),
        }
    }

    /// Clicks on an iframe are the only proxy we get for embedded form use.
    pub fn is_frame_click(&self) -> bool {
        matches!(self, Self::Click { target_tag } if target_tag.eq_ignore_ascii_case("iframe"))
    }
}
