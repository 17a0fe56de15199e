//! Browser-side campaign attribution — UTM capture, cross-frame form
//! submission correlation, persisted page-view and submission logs, and
//! on-demand export.
//!
//! # Modules
//!
//! - [`snapshot`] — UTM parameter parsing and the per-load campaign snapshot
//! - [`events`] — Page context, persisted records, inbound message boundary
//! - [`storage`] — Key-value storage capability (memory and file backed)
//! - [`tracker`] — The tracker service tying capture, listeners and logs together
//! - [`export`] — Export document and download targets
//! - [`runtime`] — Page lifecycle and global accessors

pub mod events;
pub mod export;
pub mod runtime;
pub mod snapshot;
pub mod storage;
pub mod tracker;

pub use events::{InboundMessage, PageContext, PageEvent, PageViewRecord, SubmissionRecord};
pub use export::{AllData, DirectoryTarget, DownloadTarget, ExportPayload, MemoryTarget};
pub use runtime::PageRuntime;
pub use snapshot::{CampaignSnapshot, UtmParams};
pub use storage::{FileStore, KeyValueStore, MemoryStore, TrackerStores};
pub use tracker::TrackerService;
