use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Properties;

/// Snapshot of a container's state as reported to the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub state: String,
    pub container_path: PathBuf,
    pub process_ids: Vec<String>,
    pub properties: Properties,
}

/// Resource usage counters of a container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetrics {
    pub memory_usage_bytes: u64,
    pub cpu_usage_ns: u64,
}

/// Outbound network rule for a container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetOutRule {
    /// `tcp`, `udp`, `icmp` or `all`.
    pub protocol: String,
    /// CIDR ranges the rule applies to.
    pub networks: Vec<String>,
    /// Inclusive port ranges.
    pub ports: Vec<(u16, u16)>,
}
