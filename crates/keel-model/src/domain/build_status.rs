use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Lifecycle status of a build as recorded by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Created, not yet picked up by a scheduler.
    Pending,
    /// Picked up and executing.
    Started,
    /// All steps completed successfully.
    Succeeded,
    /// A step (script or tool) failed.
    Failed,
    /// Execution broke down for reasons unrelated to the build's own steps.
    Errored,
    /// Aborted by a user.
    Aborted,
}

impl BuildStatus {
    /// Returns `true` once the build can no longer transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded
                | BuildStatus::Failed
                | BuildStatus::Errored
                | BuildStatus::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Started => "started",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
            BuildStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(BuildStatus::Pending),
            "started" => Ok(BuildStatus::Started),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            "errored" => Ok(BuildStatus::Errored),
            "aborted" => Ok(BuildStatus::Aborted),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}
