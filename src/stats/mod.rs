//! Shared counters and the periodic status report
//!
//! Counters are monotonic u64 cells updated by the owning tasks and read
//! by the status reporter; overflow is not a concern at realistic rates.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::discovery::DiscoveryRegistry;

/// Per-stream counters, shared between a relay task and the reporter
#[derive(Debug, Default)]
pub struct StreamCounters {
    /// Whether a producer is currently attached
    pub producer_up: AtomicBool,
    /// Currently attached consumers
    pub consumers: AtomicUsize,
    /// Consumers ever served
    pub clients_served: AtomicU64,
    /// Bytes received from producers and fanned out
    pub bytes_relayed: AtomicU64,
}

/// Control bridge occupancy and traffic
#[derive(Debug, Default)]
pub struct BridgeCounters {
    pub producer_up: AtomicBool,
    pub controller_up: AtomicBool,
    pub bytes_forwarded: AtomicU64,
}

fn up_down(up: &AtomicBool) -> &'static str {
    if up.load(Ordering::Relaxed) {
        "up"
    } else {
        "down"
    }
}

/// Emits the human-readable status block every interval, and once more on
/// shutdown so the final counters make it to the log.
pub struct StatusReporter {
    started_at: Instant,
    interval: Duration,
    detector: Arc<StreamCounters>,
    display: Arc<StreamCounters>,
    bridge: Arc<BridgeCounters>,
    registry: Arc<DiscoveryRegistry>,
}

impl StatusReporter {
    pub fn new(
        interval: Duration,
        detector: Arc<StreamCounters>,
        display: Arc<StreamCounters>,
        bridge: Arc<BridgeCounters>,
        registry: Arc<DiscoveryRegistry>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            interval,
            detector,
            display,
            bridge,
            registry,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.report().await,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        self.report().await;
    }

    async fn report(&self) {
        let uptime = self.started_at.elapsed().as_secs();
        for (name, counters) in [("detector", &self.detector), ("display", &self.display)] {
            tracing::info!(
                stream = name,
                producer = up_down(&counters.producer_up),
                consumers = counters.consumers.load(Ordering::Relaxed),
                served = counters.clients_served.load(Ordering::Relaxed),
                bytes = counters.bytes_relayed.load(Ordering::Relaxed),
                uptime_secs = uptime,
                "Stream status"
            );
        }
        tracing::info!(
            producer = up_down(&self.bridge.producer_up),
            controller = up_down(&self.bridge.controller_up),
            forwarded = self.bridge.bytes_forwarded.load(Ordering::Relaxed),
            "Control status"
        );
        let (edges, services) = self.registry.counts().await;
        tracing::info!(edges, services, "Registry status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = StreamCounters::default();
        assert!(!counters.producer_up.load(Ordering::Relaxed));
        assert_eq!(counters.consumers.load(Ordering::Relaxed), 0);
        assert_eq!(counters.clients_served.load(Ordering::Relaxed), 0);
        assert_eq!(counters.bytes_relayed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_up_down_labels() {
        let flag = AtomicBool::new(false);
        assert_eq!(up_down(&flag), "down");
        flag.store(true, Ordering::Relaxed);
        assert_eq!(up_down(&flag), "up");
    }
}
