use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown build status: {0}")]
    UnknownStatus(String),
    #[error("malformed env entry: {0} (expected KEY=VALUE)")]
    MalformedEnv(String),
}
