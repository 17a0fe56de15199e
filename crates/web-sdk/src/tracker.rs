//! Tracker service — captures the campaign snapshot, correlates embedded
//! form submissions with it, and owns every read and write against the
//! tracker's storage keys.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use utm_core::event_bus::{make_event, EventSink};
use utm_core::types::EventType;
use utm_core::{TrackerConfig, TrackerResult};

use crate::events::{
    FormPayload, InboundMessage, PageContext, PageEvent, PageViewRecord, SubmissionRecord,
};
use crate::export::{AllData, DownloadTarget, ExportPayload, EXPORT_MIME};
use crate::snapshot::CampaignSnapshot;
use crate::storage::{
    append_to_log, read_json, read_log, write_json, KeyValueStore, TrackerStores,
};

/// Per-page tracker. Built by [`TrackerService::init`] on page load, or by
/// [`TrackerService::new`] to work with data an earlier load persisted.
pub struct TrackerService {
    config: TrackerConfig,
    stores: TrackerStores,
    context: PageContext,
    snapshot: Option<CampaignSnapshot>,
    listening: bool,
    event_sink: Arc<dyn EventSink>,
}

impl TrackerService {
    pub fn new(config: TrackerConfig, stores: TrackerStores, context: PageContext) -> Self {
        Self {
            config,
            stores,
            context,
            snapshot: None,
            listening: false,
            event_sink: utm_core::event_bus::noop_sink(),
        }
    }

    /// Attach an event sink for forwarding analytics events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Page-load construction: capture the snapshot, then start listening.
    /// A failed snapshot write is logged; the in-memory snapshot still holds.
    pub fn init(mut self) -> Self {
        if let Err(e) = self.capture_snapshot() {
            warn!(error = %e, "campaign snapshot not persisted");
        }
        self.register_listeners();
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn context(&self) -> &PageContext {
        &self.context
    }

    /// Read UTM parameters and environment, then overwrite the snapshot in
    /// both scopes. The snapshot is kept in memory even if a write fails;
    /// the first failure is returned after both writes were attempted.
    pub fn capture_snapshot(&mut self) -> TrackerResult<CampaignSnapshot> {
        let snapshot = CampaignSnapshot::capture(&self.context, Utc::now());
        self.snapshot = Some(snapshot.clone());

        let key = self.config.snapshot_key();
        let durable = write_json(self.stores.durable.as_ref(), &key, &snapshot);
        let session = write_json(self.stores.session.as_ref(), &key, &snapshot);

        info!(
            source = %snapshot.source,
            medium = %snapshot.medium,
            campaign = %snapshot.campaign,
            content = %snapshot.content,
            landing_page = %snapshot.landing_page,
            "utm parameters captured"
        );
        if snapshot.utm().is_empty() {
            debug!(
                landing_page = %snapshot.landing_page,
                "landing page carries no utm parameters"
            );
        }

        durable.and(session)?;
        Ok(snapshot)
    }

    /// The snapshot captured by this instance, else whatever the durable
    /// scope holds. Corrupt stored snapshots read as `None`.
    pub fn snapshot(&self) -> Option<CampaignSnapshot> {
        if let Some(ref snapshot) = self.snapshot {
            return Some(snapshot.clone());
        }
        read_json(self.stores.durable.as_ref(), &self.config.snapshot_key())
    }

    /// The copy held in session scope. May differ from [`Self::snapshot`]
    /// if either scope was cleared on its own.
    pub fn session_snapshot(&self) -> Option<CampaignSnapshot> {
        read_json(self.stores.session.as_ref(), &self.config.snapshot_key())
    }

    pub fn register_listeners(&mut self) {
        if !self.listening {
            self.listening = true;
            debug!(
                message_type = %self.config.submission_message_type,
                "listening for form messages and frame clicks"
            );
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Dispatch a page event to the listeners. Returns the stored record
    /// when the event was a form submission.
    pub fn handle_event(&self, event: &PageEvent) -> TrackerResult<Option<SubmissionRecord>> {
        if !self.listening {
            return Ok(None);
        }

        match event {
            PageEvent::Message(data) => {
                match InboundMessage::parse(data, &self.config.submission_message_type) {
                    Ok(InboundMessage::FormSubmit(payload)) => {
                        self.handle_form_submission(payload).map(Some)
                    }
                    Ok(InboundMessage::Other { kind }) => {
                        debug!(kind = %kind, "ignoring unrelated message");
                        Ok(None)
                    }
                    Err(e) => {
                        debug!(error = %e, "ignoring message");
                        Ok(None)
                    }
                }
            }
            PageEvent::Click { .. } => {
                if event.is_frame_click() {
                    self.track_form_interaction();
                }
                Ok(None)
            }
        }
    }

    /// Correlate a submission with the snapshot, persist it, forward it.
    /// Forwarding happens even if persisting failed.
    pub fn handle_form_submission(&self, payload: FormPayload) -> TrackerResult<SubmissionRecord> {
        let record = SubmissionRecord::correlate(payload, self.snapshot(), Utc::now());

        info!(
            fields = record.fields.len(),
            has_utm = record.utm.is_some(),
            "form submission correlated with utm data"
        );

        let stored = self.append_submission(&record);
        self.send_to_analytics(&record);
        stored.map(|_| record)
    }

    /// Append to the submission log. Returns the new log length.
    pub fn append_submission(&self, record: &SubmissionRecord) -> TrackerResult<usize> {
        append_to_log(
            self.stores.durable.as_ref(),
            &self.config.submissions_key(),
            record,
        )
    }

    /// Append to the page-view log. Returns the new log length.
    pub fn append_page_view(&self, record: &PageViewRecord) -> TrackerResult<usize> {
        let len = append_to_log(
            self.stores.durable.as_ref(),
            &self.config.page_views_key(),
            record,
        )?;
        self.emit(EventType::PageView, serde_json::to_value(record)?);
        Ok(len)
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        read_log(self.stores.durable.as_ref(), &self.config.submissions_key())
    }

    pub fn page_views(&self) -> Vec<PageViewRecord> {
        read_log(self.stores.durable.as_ref(), &self.config.page_views_key())
    }

    pub fn all_data(&self) -> AllData {
        AllData {
            utm: self.snapshot(),
            submissions: self.submissions(),
            page_views: self.page_views(),
        }
    }

    pub fn export_payload(&self) -> ExportPayload {
        ExportPayload::new(self.snapshot(), self.submissions(), Utc::now())
    }

    /// Build the export document and hand it to `target`. Returns the filename.
    pub fn export_snapshot_data(&self, target: &dyn DownloadTarget) -> TrackerResult<String> {
        let payload = self.export_payload();
        let filename = payload.filename(&self.config);
        let body = payload.to_document()?;
        target.save(&filename, EXPORT_MIME, &body)?;

        info!(
            filename = %filename,
            submissions = payload.submissions.len(),
            "tracker data exported"
        );
        self.emit(
            EventType::DataExported,
            serde_json::json!({ "filename": filename }),
        );
        Ok(filename)
    }

    /// Remove all four keys and forget the in-memory snapshot. Every removal
    /// is attempted; the first failure is returned.
    pub fn clear_all_data(&mut self) -> TrackerResult<()> {
        self.snapshot = None;

        let snapshot_key = self.config.snapshot_key();
        let removals = [
            self.stores.durable.remove(&snapshot_key),
            self.stores.durable.remove(&self.config.submissions_key()),
            self.stores.durable.remove(&self.config.page_views_key()),
            self.stores.session.remove(&snapshot_key),
        ];

        let mut first_err = None;
        for result in removals {
            if let Err(e) = result {
                warn!(error = %e, "failed to clear tracker key");
                first_err.get_or_insert(e);
            }
        }

        info!("tracker data cleared");
        self.emit(EventType::DataCleared, serde_json::Value::Null);
        first_err.map_or(Ok(()), Err)
    }

    fn track_form_interaction(&self) {
        debug!(page = %self.context.url, "frame click, possible form interaction");
        self.emit(EventType::FormInteraction, serde_json::Value::Null);
    }

    /// Analytics hook. Only as real as the attached sink.
    fn send_to_analytics(&self, record: &SubmissionRecord) {
        match serde_json::to_value(record) {
            Ok(payload) => {
                debug!("forwarding submission to analytics");
                self.emit(EventType::FormSubmit, payload);
            }
            Err(e) => warn!(error = %e, "submission not forwarded"),
        }
    }

    fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        self.event_sink
            .emit(make_event(event_type, self.context.url.clone(), payload));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::export::MemoryTarget;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use utm_core::event_bus::capture_sink;
    use utm_core::TrackerError;

    const LANDING: &str = "https://coffee.example/vote?utm_source=newsletter&utm_campaign=spring";

    fn ctx(url: &str) -> PageContext {
        PageContext::new(url, "https://mail.example/", "Mozilla/5.0 (test)")
    }

    fn service(stores: &TrackerStores, url: &str) -> TrackerService {
        TrackerService::new(TrackerConfig::default(), stores.clone(), ctx(url)).init()
    }

    fn submit(name: &str) -> PageEvent {
        PageEvent::Message(json!({"type": "notion-form-submit", "name": name}))
    }

    /// Store whose removals always fail.
    struct StuckStore(MemoryStore);

    impl KeyValueStore for StuckStore {
        fn get(&self, key: &str) -> TrackerResult<Option<String>> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> TrackerResult<()> {
            self.0.set(key, value)
        }
        fn remove(&self, key: &str) -> TrackerResult<()> {
            Err(TrackerError::storage(key, "locked"))
        }
    }

    #[test]
    fn test_capture_writes_both_scopes() {
        let stores = TrackerStores::in_memory();
        let tracker = service(&stores, LANDING);

        let snap = tracker.snapshot().unwrap();
        assert_eq!(snap.source, "newsletter");
        assert_eq!(snap.medium, "");
        assert_eq!(snap.campaign, "spring");
        assert_eq!(snap.content, "");
        assert_eq!(snap.landing_page, LANDING);
        assert_eq!(tracker.session_snapshot(), Some(snap.clone()));

        let fresh = TrackerService::new(TrackerConfig::default(), stores, ctx(""));
        assert_eq!(fresh.snapshot(), Some(snap));
    }

    #[test]
    fn test_recapture_overwrites_instead_of_merging() {
        let stores = TrackerStores::in_memory();
        service(&stores, LANDING);
        service(&stores, "https://coffee.example/?utm_medium=social");

        let reader = TrackerService::new(TrackerConfig::default(), stores, ctx(""));
        let snap = reader.snapshot().unwrap();
        assert_eq!(snap.source, "");
        assert_eq!(snap.medium, "social");
        assert_eq!(snap.campaign, "");
    }

    #[test]
    fn test_captured_snapshot_ignores_external_writes() {
        let stores = TrackerStores::in_memory();
        let tracker = service(&stores, LANDING);
        service(&stores, "https://coffee.example/?utm_source=other-tab");

        assert_eq!(tracker.snapshot().unwrap().source, "newsletter");
    }

    #[test]
    fn test_uncaptured_snapshot_reads_storage() {
        let stores = TrackerStores::in_memory();
        let tracker = TrackerService::new(TrackerConfig::default(), stores.clone(), ctx(""));
        assert_eq!(tracker.snapshot(), None);

        stores.durable.set("coffee_vote_utm", "{oops").unwrap();
        assert_eq!(tracker.snapshot(), None);
    }

    #[test]
    fn test_submission_correlated_with_snapshot() {
        let stores = TrackerStores::in_memory();
        let sink = capture_sink();
        let tracker = service(&stores, LANDING).with_event_sink(sink.clone());

        let record = tracker.handle_event(&submit("Alice")).unwrap().unwrap();
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.fields["name"], "Alice");
        assert_eq!(record.utm.as_ref().unwrap().source, "newsletter");

        let stored = tracker.submissions();
        assert_eq!(stored, vec![record.clone()]);
        assert_eq!(sink.count_type(EventType::FormSubmit), 1);
        assert_eq!(sink.events()[0].payload["name"], "Alice");
        assert_eq!(sink.events()[0].page_url, LANDING);
    }

    #[test]
    fn test_sequential_appends_keep_call_order() {
        let stores = TrackerStores::in_memory();
        let tracker = service(&stores, LANDING);
        let names: Vec<String> = (0..6).map(|i| format!("voter-{i}")).collect();

        for name in &names {
            tracker.handle_event(&submit(name)).unwrap();
        }

        let stored: Vec<String> = tracker
            .submissions()
            .iter()
            .map(|r| r.fields["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(stored, names);
    }

    #[test]
    fn test_unrelated_and_malformed_messages_ignored() {
        let stores = TrackerStores::in_memory();
        let sink = capture_sink();
        let tracker = service(&stores, LANDING).with_event_sink(sink.clone());

        for data in [json!({"type": "resize"}), json!("hello"), json!({"name": "x"})] {
            assert!(tracker.handle_event(&PageEvent::Message(data)).unwrap().is_none());
        }
        assert!(tracker.submissions().is_empty());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_not_listening_until_registered() {
        let stores = TrackerStores::in_memory();
        let mut tracker = TrackerService::new(TrackerConfig::default(), stores, ctx(LANDING));
        assert!(!tracker.is_listening());
        assert!(tracker.handle_event(&submit("early")).unwrap().is_none());

        tracker.register_listeners();
        assert!(tracker.handle_event(&submit("late")).unwrap().is_some());
        assert_eq!(tracker.submissions().len(), 1);
    }

    #[test]
    fn test_frame_click_is_tracked_but_not_persisted() {
        let stores = TrackerStores::in_memory();
        let sink = capture_sink();
        let tracker = service(&stores, LANDING).with_event_sink(sink.clone());

        tracker.handle_event(&PageEvent::click("IFRAME")).unwrap();
        tracker.handle_event(&PageEvent::click("a")).unwrap();

        assert_eq!(sink.count_type(EventType::FormInteraction), 1);
        assert!(tracker.submissions().is_empty());
        assert!(tracker.page_views().is_empty());
    }

    #[test]
    fn test_clear_then_all_data_is_empty() {
        let stores = TrackerStores::in_memory();
        let mut tracker = service(&stores, LANDING);
        tracker.handle_event(&submit("Alice")).unwrap();
        tracker
            .append_page_view(&PageViewRecord::from_context(tracker.context(), Utc::now()))
            .unwrap();

        tracker.clear_all_data().unwrap();

        let data = tracker.all_data();
        assert_eq!(data.utm, None);
        assert!(data.submissions.is_empty());
        assert!(data.page_views.is_empty());
        assert_eq!(tracker.session_snapshot(), None);
    }

    #[test]
    fn test_clear_attempts_every_key() {
        let session = Arc::new(MemoryStore::new());
        let stores = TrackerStores::new(Arc::new(StuckStore(MemoryStore::new())), session.clone());
        let mut tracker = service(&stores, LANDING);
        assert_eq!(session.len(), 1);

        let err = tracker.clear_all_data().unwrap_err();
        assert!(matches!(err, TrackerError::StorageUnavailable { .. }));
        // The session removal still ran after the durable ones failed.
        assert!(session.is_empty());
    }

    #[test]
    fn test_snapshot_survives_write_failure() {
        let stores = TrackerStores::new(
            Arc::new(MemoryStore::with_quota(16)),
            Arc::new(MemoryStore::new()),
        );
        let mut tracker = TrackerService::new(TrackerConfig::default(), stores, ctx(LANDING));

        let err = tracker.capture_snapshot().unwrap_err();
        assert!(matches!(err, TrackerError::StorageUnavailable { ref key, .. } if key == "coffee_vote_utm"));
        assert_eq!(tracker.snapshot().unwrap().campaign, "spring");
        assert!(tracker.session_snapshot().is_some());
    }

    #[test]
    fn test_submission_forwarded_even_when_not_stored() {
        let stores = TrackerStores::new(
            Arc::new(MemoryStore::with_quota(16)),
            Arc::new(MemoryStore::new()),
        );
        let sink = capture_sink();
        let tracker = service(&stores, LANDING).with_event_sink(sink.clone());

        assert!(tracker.handle_event(&submit("Alice")).is_err());
        assert_eq!(sink.count_type(EventType::FormSubmit), 1);
        // Falls back to the in-memory snapshot even though none was stored.
        assert_eq!(sink.events()[0].payload["utm"]["campaign"], "spring");
    }

    #[test]
    fn test_export_round_trips_all_data() {
        let stores = TrackerStores::in_memory();
        let tracker = service(&stores, LANDING);
        tracker.handle_event(&submit("Alice")).unwrap();
        tracker.handle_event(&submit("Bob")).unwrap();

        let target = MemoryTarget::new();
        let filename = tracker.export_snapshot_data(&target).unwrap();
        assert!(filename.starts_with("coffee_vote_data_"));
        assert!(filename.ends_with(".json"));

        let exported = target.last_payload().unwrap().unwrap();
        let data = tracker.all_data();
        assert_eq!(exported.utm, data.utm);
        assert_eq!(exported.submissions, data.submissions);
        assert_eq!(filename, exported.filename(tracker.config()));
    }

    #[test]
    fn test_session_scope_can_diverge() {
        let stores = TrackerStores::in_memory();
        let tracker = service(&stores, LANDING);
        stores.session.remove("coffee_vote_utm").unwrap();

        assert!(tracker.session_snapshot().is_none());
        assert!(tracker.snapshot().is_some());
    }
}
