//! Page runtime — the explicit lifecycle around a [`TrackerService`] and the
//! accessors other scripts on the page call into.
//!
//! Accessors use optional access: before [`PageRuntime::on_page_ready`] or
//! after [`PageRuntime::teardown`] they return `None` and touch nothing.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use utm_core::event_bus::EventSink;
use utm_core::{TrackerConfig, TrackerResult};

use crate::events::{PageContext, PageEvent, PageViewRecord, SubmissionRecord};
use crate::export::{AllData, DownloadTarget};
use crate::snapshot::CampaignSnapshot;
use crate::storage::TrackerStores;
use crate::tracker::TrackerService;

pub struct PageRuntime {
    config: TrackerConfig,
    stores: TrackerStores,
    event_sink: Arc<dyn EventSink>,
    tracker: RwLock<Option<TrackerService>>,
}

impl PageRuntime {
    pub fn new(config: TrackerConfig, stores: TrackerStores) -> Self {
        Self {
            config,
            stores,
            event_sink: utm_core::event_bus::noop_sink(),
            tracker: RwLock::new(None),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Document-ready hook: build the tracker (snapshot capture plus
    /// listeners), then log one page view. The tracker stays installed even
    /// if the page-view write fails.
    pub fn on_page_ready(&self, context: PageContext) -> TrackerResult<PageViewRecord> {
        let page_view = PageViewRecord::from_context(&context, Utc::now());
        let tracker = TrackerService::new(self.config.clone(), self.stores.clone(), context)
            .with_event_sink(self.event_sink.clone())
            .init();

        let mut slot = self.tracker.write();
        if slot.is_some() {
            debug!("replacing tracker from previous page load");
        }
        let tracker = slot.insert(tracker);

        let count = tracker.append_page_view(&page_view)?;
        info!(url = %page_view.url, page_views = count, "page view recorded");
        Ok(page_view)
    }

    /// Install a listening tracker for a page whose load was already
    /// handled. Nothing is captured or logged; the snapshot is read back
    /// from durable storage.
    pub fn attach(&self, context: PageContext) {
        let mut tracker = TrackerService::new(self.config.clone(), self.stores.clone(), context)
            .with_event_sink(self.event_sink.clone());
        tracker.register_listeners();
        *self.tracker.write() = Some(tracker);
    }

    /// Drop the tracker. Persisted data is left alone.
    pub fn teardown(&self) -> bool {
        let removed = self.tracker.write().take().is_some();
        if removed {
            info!("tracker torn down");
        }
        removed
    }

    pub fn is_initialized(&self) -> bool {
        self.tracker.read().is_some()
    }

    /// Deliver an event to the installed tracker. Events before init are dropped.
    pub fn dispatch(&self, event: &PageEvent) -> TrackerResult<Option<SubmissionRecord>> {
        match self.tracker.read().as_ref() {
            Some(tracker) => tracker.handle_event(event),
            None => {
                debug!(event = ?event, "no tracker installed, event dropped");
                Ok(None)
            }
        }
    }

    /// Post raw data to the page's message channel.
    pub fn post_message(&self, data: serde_json::Value) -> TrackerResult<Option<SubmissionRecord>> {
        self.dispatch(&PageEvent::Message(data))
    }

    pub fn click(&self, target_tag: &str) {
        if let Err(e) = self.dispatch(&PageEvent::click(target_tag)) {
            warn!(error = %e, "click handling failed");
        }
    }

    pub fn utm_data(&self) -> Option<CampaignSnapshot> {
        self.tracker.read().as_ref().and_then(TrackerService::snapshot)
    }

    pub fn all_data(&self) -> Option<AllData> {
        self.tracker.read().as_ref().map(TrackerService::all_data)
    }

    pub fn clear_all_data(&self) -> Option<TrackerResult<()>> {
        self.tracker.write().as_mut().map(TrackerService::clear_all_data)
    }

    pub fn export_data(&self, target: &dyn DownloadTarget) -> Option<TrackerResult<String>> {
        self.tracker
            .read()
            .as_ref()
            .map(|tracker| tracker.export_snapshot_data(target))
    }
}
