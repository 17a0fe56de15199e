//! Data export — assembles the persisted state into a date-stamped JSON
//! document and hands it to a download target.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use utm_core::{TrackerConfig, TrackerResult};

use crate::events::{PageViewRecord, SubmissionRecord};
use crate::snapshot::CampaignSnapshot;

pub const EXPORT_MIME: &str = "application/json";

/// Full persisted state as seen by `getAllData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllData {
    pub utm: Option<CampaignSnapshot>,
    pub submissions: Vec<SubmissionRecord>,
    pub page_views: Vec<PageViewRecord>,
}

/// The downloadable export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub utm: Option<CampaignSnapshot>,
    pub submissions: Vec<SubmissionRecord>,
    pub export_time: DateTime<Utc>,
}

impl ExportPayload {
    pub fn new(
        utm: Option<CampaignSnapshot>,
        submissions: Vec<SubmissionRecord>,
        export_time: DateTime<Utc>,
    ) -> Self {
        Self {
            utm,
            submissions,
            export_time,
        }
    }

    /// Filename stamped with the export date.
    pub fn filename(&self, config: &TrackerConfig) -> String {
        config.export_filename(self.export_time.date_naive())
    }

    /// Pretty JSON, two-space indent.
    pub fn to_document(&self) -> TrackerResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Where a finished export goes; the browser's save dialog in spirit.
pub trait DownloadTarget: Send + Sync {
    fn save(&self, filename: &str, mime: &str, body: &[u8]) -> TrackerResult<()>;
}

/// Saves exports as files in a directory, creating it if needed.
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    dir: PathBuf,
}

impl DirectoryTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadTarget for DirectoryTarget {
    fn save(&self, filename: &str, _mime: &str, body: &[u8]) -> TrackerResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        fs::write(&path, body)?;
        info!(path = %path.display(), bytes = body.len(), "export saved");
        Ok(())
    }
}

/// A single file handed to a [`MemoryTarget`].
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub filename: String,
    pub mime: String,
    pub body: Vec<u8>,
}

/// Keeps exports in memory. Useful for tests and embedding hosts.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    files: Mutex<Vec<SavedFile>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<SavedFile> {
        self.files.lock().clone()
    }

    /// Decode the most recent export.
    pub fn last_payload(&self) -> TrackerResult<Option<ExportPayload>> {
        match self.files.lock().last() {
            Some(file) => Ok(Some(serde_json::from_slice(&file.body)?)),
            None => Ok(None),
        }
    }
}

impl DownloadTarget for MemoryTarget {
    fn save(&self, filename: &str, mime: &str, body: &[u8]) -> TrackerResult<()> {
        self.files.lock().push(SavedFile {
            filename: filename.to_string(),
            mime: mime.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }
}
