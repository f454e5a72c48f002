use serde::{Deserialize, Serialize};

/// CPU allocation of a container. Zero means "no limit configured".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuLimits {
    /// Relative CPU weight (cgroup shares).
    pub weight: u64,
}

/// Memory allocation of a container. Zero means "no limit configured".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLimits {
    pub limit_in_bytes: u64,
}

/// Network bandwidth limits. Not enforced by the container runtime; always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthLimits {
    pub rate_in_bytes_per_second: u64,
    pub burst_rate_in_bytes_per_second: u64,
}

/// Disk quota limits. Not enforced by the container runtime; always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskLimits {
    pub inode_soft: u64,
    pub inode_hard: u64,
    pub byte_soft: u64,
    pub byte_hard: u64,
}
