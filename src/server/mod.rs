//! Relay server assembly
//!
//! Binds the four listeners up front (failure here is fatal: the process
//! has nothing to do without its ports), then runs one task per stream,
//! one for the control bridge, one discovery accept loop with a task per
//! edge session, and the status reporter. Each table in the system is
//! owned by exactly one task; the stream tasks share nothing and may run
//! in parallel.

pub mod config;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::control::ControlBridge;
use crate::discovery::{DiscoveryRegistry, EdgeSession};
use crate::error::Result;
use crate::protocol::StreamHeader;
use crate::stats::{BridgeCounters, StatusReporter, StreamCounters};
use crate::stream::StreamRelay;

pub use config::RelayConfig;

/// The assembled relay: listeners bound, tasks not yet running
pub struct RelayServer {
    config: RelayConfig,
    detector: StreamRelay,
    display: StreamRelay,
    bridge: ControlBridge,
    discovery_listener: TcpListener,
    registry: Arc<DiscoveryRegistry>,
    detector_counters: Arc<StreamCounters>,
    display_counters: Arc<StreamCounters>,
    bridge_counters: Arc<BridgeCounters>,
}

impl RelayServer {
    /// Bind all four listeners.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let detector_listener = TcpListener::bind(config.detector_addr).await?;
        let display_listener = TcpListener::bind(config.display_addr).await?;
        let control_listener = TcpListener::bind(config.control_addr).await?;
        let discovery_listener = TcpListener::bind(config.discovery_addr).await?;

        tracing::info!(addr = %detector_listener.local_addr()?, "Detector stream listening");
        tracing::info!(addr = %display_listener.local_addr()?, "Display stream listening");
        tracing::info!(addr = %control_listener.local_addr()?, "Control bridge listening");
        tracing::info!(addr = %discovery_listener.local_addr()?, "Discovery registry listening");

        let registry = Arc::new(DiscoveryRegistry::with_config(config.registry.clone()));
        let detector_counters = Arc::new(StreamCounters::default());
        let display_counters = Arc::new(StreamCounters::default());
        let bridge_counters = Arc::new(BridgeCounters::default());

        let detector = StreamRelay::new(
            "detector",
            detector_listener,
            StreamHeader::new(config.detector_sample_rate),
            config.ring_capacity(config.detector_sample_rate),
            config.max_consumers,
            config.drain_tick,
            Arc::clone(&detector_counters),
        );
        let display = StreamRelay::new(
            "display",
            display_listener,
            StreamHeader::new(config.display_sample_rate),
            config.ring_capacity(config.display_sample_rate),
            config.max_consumers,
            config.drain_tick,
            Arc::clone(&display_counters),
        );
        let bridge = ControlBridge::new(control_listener, Arc::clone(&bridge_counters));

        Ok(Self {
            config,
            detector,
            display,
            bridge,
            discovery_listener,
            registry,
            detector_counters,
            display_counters,
            bridge_counters,
        })
    }

    /// Bound detector stream address
    pub fn detector_addr(&self) -> io::Result<SocketAddr> {
        self.detector.local_addr()
    }

    /// Bound display stream address
    pub fn display_addr(&self) -> io::Result<SocketAddr> {
        self.display.local_addr()
    }

    /// Bound control bridge address
    pub fn control_addr(&self) -> io::Result<SocketAddr> {
        self.bridge.local_addr()
    }

    /// Bound discovery registry address
    pub fn discovery_addr(&self) -> io::Result<SocketAddr> {
        self.discovery_listener.local_addr()
    }

    /// Shared discovery registry handle
    pub fn registry(&self) -> &Arc<DiscoveryRegistry> {
        &self.registry
    }

    /// Run until `shutdown` completes, then stop every task and close all
    /// sockets before returning.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let status = StatusReporter::new(
            self.config.status_interval,
            Arc::clone(&self.detector_counters),
            Arc::clone(&self.display_counters),
            Arc::clone(&self.bridge_counters),
            Arc::clone(&self.registry),
        );

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(self.detector.run(stop_rx.clone())));
        tasks.push(tokio::spawn(self.display.run(stop_rx.clone())));
        tasks.push(tokio::spawn(self.bridge.run(stop_rx.clone())));
        tasks.push(tokio::spawn(discovery_accept_loop(
            self.discovery_listener,
            Arc::clone(&self.registry),
            self.config.edge_timeout,
            stop_rx.clone(),
        )));
        tasks.push(tokio::spawn(status.run(stop_rx)));

        shutdown.await;
        tracing::info!("Shutting down");
        let _ = stop_tx.send(true);
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    /// Run until the process is killed.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }
}

enum AcceptEvent {
    Conn(io::Result<(TcpStream, SocketAddr)>),
    SessionEnded,
    Shutdown,
}

/// Accept edge connections and run one session task per edge. The edge cap
/// is enforced at accept: a refused connection is closed immediately and
/// existing edges are unaffected.
async fn discovery_accept_loop(
    listener: TcpListener,
    registry: Arc<DiscoveryRegistry>,
    edge_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions: JoinSet<()> = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        let event = tokio::select! {
            _ = shutdown.changed() => AcceptEvent::Shutdown,
            Some(_) = sessions.join_next() => AcceptEvent::SessionEnded,
            r = listener.accept() => AcceptEvent::Conn(r),
        };

        match event {
            AcceptEvent::Shutdown => break,
            AcceptEvent::SessionEnded => {}
            AcceptEvent::Conn(Ok((stream, addr))) => match registry.add_edge(addr).await {
                Ok(id) => {
                    let session = EdgeSession::new(
                        id,
                        stream,
                        addr,
                        Arc::clone(&registry),
                        edge_timeout,
                    );
                    sessions.spawn(session.run(shutdown.clone()));
                }
                Err(e) => {
                    tracing::warn!(peer = %addr, error = %e, "Edge refused");
                }
            },
            AcceptEvent::Conn(Err(e)) => {
                tracing::error!(error = %e, "Discovery accept failed");
            }
        }
    }

    // Wait for the edge sessions to observe shutdown and unregister.
    while sessions.join_next().await.is_some() {}
    tracing::info!("Discovery coordinator stopped");
}
