//! Relay configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::discovery::RegistryConfig;
use crate::protocol::BYTES_PER_SAMPLE;

/// Everything the relay core accepts as configuration: its four bind
/// addresses and the tunables the wire protocol treats as constants.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Detector stream listen address (50 kHz I/Q)
    pub detector_addr: SocketAddr,

    /// Display stream listen address (12 kHz I/Q)
    pub display_addr: SocketAddr,

    /// Control bridge listen address
    pub control_addr: SocketAddr,

    /// Discovery registry listen address
    pub discovery_addr: SocketAddr,

    /// Detector stream sample rate in Hz
    pub detector_sample_rate: u32,

    /// Display stream sample rate in Hz
    pub display_sample_rate: u32,

    /// Seconds of stream data each consumer ring can absorb
    pub ring_seconds: u32,

    /// Maximum consumers attached to one stream
    pub max_consumers: usize,

    /// Discovery table limits
    pub registry: RegistryConfig,

    /// Drop an edge after this long without any inbound message
    pub edge_timeout: Duration,

    /// Consumer drain / housekeeping tick
    pub drain_tick: Duration,

    /// Periodic status report interval
    pub status_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            detector_addr: "0.0.0.0:4410".parse().unwrap(),
            display_addr: "0.0.0.0:4411".parse().unwrap(),
            control_addr: "0.0.0.0:4409".parse().unwrap(),
            discovery_addr: "0.0.0.0:5401".parse().unwrap(),
            detector_sample_rate: 50_000,
            display_sample_rate: 12_000,
            ring_seconds: 30,
            max_consumers: 100,
            registry: RegistryConfig::default(),
            edge_timeout: Duration::from_secs(120),
            drain_tick: Duration::from_millis(100),
            status_interval: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// All four listeners on ephemeral loopback ports. Used by test
    /// harnesses that discover the bound addresses after `bind`.
    pub fn loopback() -> Self {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        Self {
            detector_addr: any,
            display_addr: any,
            control_addr: any,
            discovery_addr: any,
            ..Default::default()
        }
    }

    /// Set the per-stream consumer cap
    pub fn max_consumers(mut self, max: usize) -> Self {
        self.max_consumers = max;
        self
    }

    /// Set the consumer ring size in seconds of stream data
    pub fn ring_seconds(mut self, seconds: u32) -> Self {
        self.ring_seconds = seconds;
        self
    }

    /// Set the discovery table limits
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the edge idle timeout
    pub fn edge_timeout(mut self, timeout: Duration) -> Self {
        self.edge_timeout = timeout;
        self
    }

    /// Set the status report interval
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Ring capacity in bytes for a stream at `sample_rate`
    pub(crate) fn ring_capacity(&self, sample_rate: u32) -> usize {
        sample_rate as usize * self.ring_seconds as usize * BYTES_PER_SAMPLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.detector_addr.port(), 4410);
        assert_eq!(config.display_addr.port(), 4411);
        assert_eq!(config.control_addr.port(), 4409);
        assert_eq!(config.discovery_addr.port(), 5401);
        assert_eq!(config.max_consumers, 100);
        assert_eq!(config.registry.max_edges, 32);
        assert_eq!(config.registry.max_services, 128);
        assert_eq!(config.edge_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_ring_capacity_covers_thirty_seconds() {
        let config = RelayConfig::default();

        // 50 kHz * 30 s * 8 bytes per complex sample
        assert_eq!(config.ring_capacity(50_000), 12_000_000);
        assert_eq!(config.ring_capacity(12_000), 2_880_000);
    }

    #[test]
    fn test_builder_chaining() {
        let config = RelayConfig::loopback()
            .max_consumers(5)
            .ring_seconds(1)
            .edge_timeout(Duration::from_millis(200))
            .registry(RegistryConfig::default().max_edges(2).max_services(3));

        assert_eq!(config.detector_addr.port(), 0);
        assert_eq!(config.max_consumers, 5);
        assert_eq!(config.ring_capacity(50_000), 400_000);
        assert_eq!(config.edge_timeout, Duration::from_millis(200));
        assert_eq!(config.registry.max_edges, 2);
        assert_eq!(config.registry.max_services, 3);
    }
}
