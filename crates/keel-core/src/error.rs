use keel_model::TrackingKey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The build source could not be queried (e.g. persistence unavailable).
    #[error("build source: {0}")]
    Source(String),
    /// Recording a build's terminal status failed.
    #[error("finish {key}: {reason}")]
    Finish { key: TrackingKey, reason: String },
    /// A build execution panicked; carries the rendered panic payload.
    #[error("build execution panicked: {0}")]
    Panicked(String),
}
