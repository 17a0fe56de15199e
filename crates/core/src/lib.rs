pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
