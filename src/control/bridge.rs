//! Control channel bridge
//!
//! One listener, two slots: the first accepted connection is the edge
//! producer, the second the remote controller, and anything further is
//! turned away. Bytes are forwarded verbatim in both directions. The
//! command protocol is a request/response dialogue, so losing either side
//! tears the whole bridge down; a half-open bridge would strand the
//! surviving peer with no way to recover.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::stats::BridgeCounters;

/// Largest single read on either side of the bridge
const FORWARD_CHUNK: usize = 4096;

#[derive(Debug)]
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Producer,
    Controller,
}

impl Side {
    fn label(self) -> &'static str {
        match self {
            Side::Producer => "producer",
            Side::Controller => "controller",
        }
    }
}

enum Wake {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Readable(Side, io::Result<()>),
    Shutdown,
}

/// Bidirectional text relay between the edge and one remote controller
pub struct ControlBridge {
    listener: TcpListener,
    producer: Option<Peer>,
    controller: Option<Peer>,
    counters: Arc<BridgeCounters>,
}

impl ControlBridge {
    pub fn new(listener: TcpListener, counters: Arc<BridgeCounters>) -> Self {
        Self {
            listener,
            producer: None,
            controller: None,
            counters,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until shutdown is signalled. Forwarding only happens while both
    /// sides are connected; bytes sent earlier wait in the kernel buffer
    /// until the dialogue is ready.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let both = self.producer.is_some() && self.controller.is_some();
            let wake = tokio::select! {
                _ = shutdown.changed() => Wake::Shutdown,
                r = self.listener.accept() => Wake::Accepted(r),
                r = Self::readable(&self.producer), if both => Wake::Readable(Side::Producer, r),
                r = Self::readable(&self.controller), if both => Wake::Readable(Side::Controller, r),
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Accepted(Ok((stream, addr))) => self.on_accept(stream, addr),
                Wake::Accepted(Err(e)) => tracing::error!(error = %e, "Control accept failed"),
                Wake::Readable(side, Ok(())) => {
                    if !self.forward(side) {
                        self.teardown();
                    }
                }
                Wake::Readable(side, Err(e)) => {
                    tracing::warn!(side = side.label(), error = %e, "Control connection lost");
                    self.teardown();
                }
            }
        }

        tracing::info!("Control bridge stopped");
    }

    async fn readable(peer: &Option<Peer>) -> io::Result<()> {
        match peer {
            Some(p) => p.stream.readable().await,
            None => std::future::pending().await,
        }
    }

    fn on_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.producer.is_none() {
            tracing::info!(peer = %addr, "Control producer connected");
            self.producer = Some(Peer { stream, addr });
            self.counters.producer_up.store(true, Ordering::Relaxed);
        } else if self.controller.is_none() {
            tracing::info!(peer = %addr, "Control controller connected");
            self.controller = Some(Peer { stream, addr });
            self.counters.controller_up.store(true, Ordering::Relaxed);
        } else {
            tracing::warn!(peer = %addr, "Control bridge occupied, refusing connection");
        }
    }

    /// Relay one chunk from `from` to the opposite side. Returns false when
    /// the bridge must be torn down.
    fn forward(&mut self, from: Side) -> bool {
        let (src, dst) = match from {
            Side::Producer => (self.producer.as_mut(), self.controller.as_mut()),
            Side::Controller => (self.controller.as_mut(), self.producer.as_mut()),
        };
        let (Some(src), Some(dst)) = (src, dst) else {
            return true;
        };

        let mut buf = [0u8; FORWARD_CHUNK];
        let n = match src.stream.try_read(&mut buf) {
            Ok(0) => {
                tracing::info!(side = from.label(), peer = %src.addr, "Control peer closed");
                return false;
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(e) => {
                tracing::warn!(side = from.label(), error = %e, "Control read failed");
                return false;
            }
        };

        match dst.stream.try_write(&buf[..n]) {
            Ok(written) if written == n => {
                self.counters
                    .bytes_forwarded
                    .fetch_add(n as u64, Ordering::Relaxed);
                true
            }
            Ok(written) => {
                // A half-delivered command would desync the dialogue.
                tracing::warn!(
                    side = from.label(),
                    sent = written,
                    pending = n - written,
                    "Partial control write, tearing bridge down"
                );
                false
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::warn!(side = from.label(), dropped = n, "Control peer not accepting data");
                true
            }
            Err(e) => {
                tracing::warn!(side = from.label(), error = %e, "Control write failed");
                false
            }
        }
    }

    /// Close both sides and clear the slots.
    fn teardown(&mut self) {
        if let Some(p) = self.producer.take() {
            tracing::info!(peer = %p.addr, "Control producer detached");
        }
        if let Some(c) = self.controller.take() {
            tracing::info!(peer = %c.addr, "Control controller detached");
        }
        self.counters.producer_up.store(false, Ordering::Relaxed);
        self.counters.controller_up.store(false, Ordering::Relaxed);
    }
}
