use serde::{Deserialize, Serialize};

/// Signals a caller may deliver to a running process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Terminate,
    Kill,
}
