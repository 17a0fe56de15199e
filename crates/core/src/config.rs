use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{TrackerError, TrackerResult};

/// Root tracker configuration. Loaded from environment variables with the
/// prefix `UTM_TRACKER__`; every field falls back to a default.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Prefix shared by every storage key and the export filename.
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,
    /// `type` discriminator that marks an inbound message as a form submission.
    #[serde(default = "default_submission_message_type")]
    pub submission_message_type: String,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the durable and session scope files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory exports are saved into.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_storage_prefix() -> String {
    "coffee_vote".to_string()
}
fn default_submission_message_type() -> String {
    "notion-form-submit".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".utm-tracker")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            storage_prefix: default_storage_prefix(),
            submission_message_type: default_submission_message_type(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            download_dir: default_download_dir(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    pub fn load() -> TrackerResult<Self> {
        Self::from_source(
            config::Environment::with_prefix("UTM_TRACKER")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source<S>(source: S) -> TrackerResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TrackerError::Config(e.to_string()))
    }

    /// Key of the campaign snapshot, identical in both storage scopes.
    pub fn snapshot_key(&self) -> String {
        format!("{}_utm", self.storage_prefix)
    }

    pub fn submissions_key(&self) -> String {
        format!("{}_submissions", self.storage_prefix)
    }

    pub fn page_views_key(&self) -> String {
        format!("{}_pageviews", self.storage_prefix)
    }

    /// Export filename for the given calendar date.
    pub fn export_filename(&self, date: chrono::NaiveDate) -> String {
        format!("{}_data_{}.json", self.storage_prefix, date.format("%Y-%m-%d"))
    }
}
