use std::collections::BTreeMap;

/// Arbitrary key/value properties attached to a container.
pub type Properties = BTreeMap<String, String>;

/// Reserved property holding the container's grace time, in nanoseconds.
pub const GRACE_TIME_KEY: &str = "garden.grace-time";
