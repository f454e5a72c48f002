mod build_status;
pub use build_status::BuildStatus;

mod tracking_key;
pub use tracking_key::TrackingKey;

mod properties;
pub use properties::{GRACE_TIME_KEY, Properties};

mod container;
pub use container::{ContainerInfo, ContainerMetrics, NetOutRule};

mod limits;
pub use limits::{BandwidthLimits, CpuLimits, DiskLimits, MemoryLimits};

/// Identifier of a persisted build. Zero means "not persisted".
pub type BuildId = i64;

/// Identifier of the resource an in-memory check belongs to.
pub type ResourceId = i64;
