use std::time::Duration;

/// Settings for the periodic tracker driver.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Delay between two consecutive `Tracker::run` invocations.
    pub interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}
