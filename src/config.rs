use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of store instances in a device set
pub const DEFAULT_DEVICES: usize = 4;

/// Default bytes per block
pub const DEFAULT_QUANTUM: usize = 4000;

/// Default block slots per chain node
pub const DEFAULT_QSET: usize = 500;

/// Default minimum latency of a deferred completion
pub const DEFAULT_COMPLETION_DELAY: Duration = Duration::from_millis(10);

/// Configuration for a set of sparse stores
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Number of independent store instances (default: 4)
    pub devices: usize,

    /// Bytes per block each instance starts with and returns to on trim (default: 4000)
    pub quantum: usize,

    /// Block slots per chain node each instance starts with (default: 500)
    pub qset: usize,

    /// Delay before a deferred request runs (default: 10ms)
    pub completion_delay: Duration,

    /// How often to log store metrics; disabled when `None` (default: None)
    pub metrics_interval: Option<Duration>,

    /// Upper bound on live blocks per instance; unbounded when `None` (default: None)
    pub max_blocks: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            devices: DEFAULT_DEVICES,
            quantum: DEFAULT_QUANTUM,
            qset: DEFAULT_QSET,
            completion_delay: DEFAULT_COMPLETION_DELAY,
            metrics_interval: None,
            max_blocks: None,
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of store instances
    pub fn devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Set the default block size
    pub fn quantum(mut self, quantum: usize) -> Self {
        self.quantum = quantum;
        self
    }

    /// Set the default slots per node
    pub fn qset(mut self, qset: usize) -> Self {
        self.qset = qset;
        self
    }

    /// Set the deferred completion delay
    pub fn completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    /// Enable periodic metrics logging
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    /// Cap the number of live blocks per instance
    pub fn max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices == 0 {
            return Err(Error::InvalidArgument("device count must be positive".into()));
        }
        crate::store::Layout::new(self.quantum, self.qset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeviceConfig::default();
        assert_eq!(config.devices, 4);
        assert_eq!(config.quantum, 4000);
        assert_eq!(config.qset, 500);
        assert_eq!(config.completion_delay, Duration::from_millis(10));
        assert!(config.metrics_interval.is_none());
        assert!(config.max_blocks.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = DeviceConfig::new()
            .devices(2)
            .quantum(4096)
            .qset(4)
            .completion_delay(Duration::from_millis(1))
            .metrics_interval(Duration::from_secs(5))
            .max_blocks(16);

        assert_eq!(config.devices, 2);
        assert_eq!(config.quantum, 4096);
        assert_eq!(config.qset, 4);
        assert_eq!(config.completion_delay, Duration::from_millis(1));
        assert_eq!(config.metrics_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.max_blocks, Some(16));
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        assert!(DeviceConfig::new().devices(0).validate().is_err());
        assert!(DeviceConfig::new().quantum(0).validate().is_err());
        assert!(DeviceConfig::new().qset(0).validate().is_err());
    }
}
