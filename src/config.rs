//! Coordinator configuration.

use std::time::Duration;

use crate::core::bluetooth::{EVENT_CHANNEL_CAPACITY, SCAN_TIMEOUT_MS};

/// Configuration for the device coordinator
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CoordinatorConfig {
    /// How long a scan runs before it stops itself
    pub scan_timeout: Duration,
    /// Capacity of the device event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_millis(SCAN_TIMEOUT_MS),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan window
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(15));
        assert_eq!(config.event_channel_capacity, 64);
    }

    #[test]
    fn builders_override_fields() {
        let config = CoordinatorConfig::new()
            .with_scan_timeout(Duration::from_secs(5))
            .with_event_channel_capacity(8);
        assert_eq!(config.scan_timeout, Duration::from_secs(5));
        assert_eq!(config.event_channel_capacity, 8);
    }
}
