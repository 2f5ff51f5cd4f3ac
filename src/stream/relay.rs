//! Single-stream fan-out
//!
//! One task owns everything a stream needs: the listen socket, the
//! producer slot, and the consumer set. Every connection accepted on the
//! stream port starts out as a consumer; the connection that actually
//! sends bytes is promoted to producer (displacing any previous one),
//! since consumers are passive on this protocol and inbound data is the
//! only reliable discriminator on a shared port. Ring drains run after
//! every wakeup and at least once per tick.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::protocol::StreamHeader;
use crate::stats::StreamCounters;
use crate::stream::consumer::ConsumerSet;

/// Largest single read from the producer socket
const RECV_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct Producer {
    stream: TcpStream,
    addr: SocketAddr,
}

enum Wake {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    ProducerReadable(io::Result<()>),
    Tick,
    Shutdown,
}

/// Relay task state for one I/Q stream
pub struct StreamRelay {
    name: &'static str,
    listener: TcpListener,
    producer: Option<Producer>,
    consumers: ConsumerSet,
    counters: Arc<StreamCounters>,
    tick: Duration,
    recv_buf: Vec<u8>,
}

impl StreamRelay {
    pub fn new(
        name: &'static str,
        listener: TcpListener,
        header: StreamHeader,
        ring_capacity: usize,
        max_consumers: usize,
        tick: Duration,
        counters: Arc<StreamCounters>,
    ) -> Self {
        Self {
            name,
            listener,
            producer: None,
            consumers: ConsumerSet::new(name, header, ring_capacity, max_consumers),
            counters,
            tick,
            recv_buf: vec![0u8; RECV_CHUNK],
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until shutdown is signalled. Consumes the relay; all sockets
    /// close when the task returns.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let wake = tokio::select! {
                _ = shutdown.changed() => Wake::Shutdown,
                r = self.listener.accept() => Wake::Accepted(r),
                r = Self::producer_readable(&self.producer) => Wake::ProducerReadable(r),
                _ = ticker.tick() => Wake::Tick,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Accepted(Ok((stream, addr))) => self.on_accept(stream, addr),
                Wake::Accepted(Err(e)) => {
                    tracing::error!(stream = self.name, error = %e, "Accept failed");
                }
                Wake::ProducerReadable(Ok(())) => self.pump_producer(),
                Wake::ProducerReadable(Err(e)) => {
                    tracing::warn!(stream = self.name, error = %e, "Producer connection lost");
                    self.clear_producer();
                }
                Wake::Tick => {}
            }

            if let Some((stream, addr, first)) = self.consumers.take_sender() {
                self.adopt_producer(stream, addr, &first);
            }
            self.consumers.drain();
            self.counters
                .consumers
                .store(self.consumers.len(), Ordering::Relaxed);
        }

        tracing::info!(stream = self.name, "Stream relay stopped");
    }

    async fn producer_readable(producer: &Option<Producer>) -> io::Result<()> {
        match producer {
            Some(p) => p.stream.readable().await,
            None => std::future::pending().await,
        }
    }

    fn on_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        match self.consumers.attach(stream, addr) {
            Ok(()) => {
                self.counters.clients_served.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(stream = self.name, peer = %addr, error = %e, "Connection refused");
            }
        }
    }

    /// Read one chunk from the producer and fan it out. EOF and fatal
    /// errors close the producer; consumers stay attached and simply stop
    /// receiving new data.
    fn pump_producer(&mut self) {
        let Some(producer) = self.producer.as_mut() else {
            return;
        };
        match producer.stream.try_read(&mut self.recv_buf) {
            Ok(0) => {
                tracing::info!(stream = self.name, peer = %producer.addr, "Producer closed");
                self.clear_producer();
            }
            Ok(n) => {
                self.consumers.broadcast(&self.recv_buf[..n]);
                self.counters
                    .bytes_relayed
                    .fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::warn!(stream = self.name, error = %e, "Producer connection lost");
                self.clear_producer();
            }
        }
    }

    /// Install a connection that proved itself the producer by sending
    /// data. Last wins: the previous producer is usually a half-closed
    /// ghost, and operators expect a reconnect to take over.
    fn adopt_producer(&mut self, stream: TcpStream, addr: SocketAddr, first: &[u8]) {
        match self.producer.take() {
            Some(old) => tracing::info!(
                stream = self.name,
                old = %old.addr,
                new = %addr,
                "Producer replaced"
            ),
            None => tracing::info!(stream = self.name, peer = %addr, "Producer attached"),
        }
        self.producer = Some(Producer { stream, addr });
        self.counters.producer_up.store(true, Ordering::Relaxed);
        // The promoted connection was briefly counted as a served client.
        self.counters.clients_served.fetch_sub(1, Ordering::Relaxed);

        if !first.is_empty() {
            self.consumers.broadcast(first);
            self.counters
                .bytes_relayed
                .fetch_add(first.len() as u64, Ordering::Relaxed);
        }
    }

    fn clear_producer(&mut self) {
        self.producer = None;
        self.counters.producer_up.store(false, Ordering::Relaxed);
    }
}
