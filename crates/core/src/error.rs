use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage unavailable for key {key}: {reason}")]
    StorageUnavailable { key: String, reason: String },

    #[error("Corrupt data under key {key}: {source}")]
    DataCorruption {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid inbound message: {0}")]
    InvalidMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Shorthand for a failed write or remove against a storage key.
    pub fn storage(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
