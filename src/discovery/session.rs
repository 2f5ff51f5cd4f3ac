//! Per-edge discovery session
//!
//! Each accepted edge connection runs in its own task: bytes are framed
//! into lines, lines into commands, commands applied to the shared
//! registry. Reads are bounded by the edge timeout, so a silent edge is
//! dropped and its services with it; any inbound byte counts as liveness.
//! Every exit path unregisters the edge before the task returns.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::framer::LineFramer;
use super::registry::{DiscoveryRegistry, EdgeId};
use super::wire::{EdgeCommand, ListReply};

/// Bound on a single listing-response write; a peer that cannot take a
/// response in this long is treated as dead.
const RESPONSE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One registered edge connection
pub struct EdgeSession {
    id: EdgeId,
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<DiscoveryRegistry>,
    framer: LineFramer,
    idle_timeout: Duration,
}

impl EdgeSession {
    pub fn new(
        id: EdgeId,
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<DiscoveryRegistry>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            id,
            stream,
            addr,
            registry,
            framer: LineFramer::new(),
            idle_timeout,
        }
    }

    /// Serve the edge until it goes away, then unregister it and every
    /// service it owns.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let reason = self.serve(&mut shutdown).await;
        tracing::info!(edge = %self.id, peer = %self.addr, reason, "Edge session ended");
        self.registry.remove_edge(self.id).await;
    }

    async fn serve(&mut self, shutdown: &mut watch::Receiver<bool>) -> &'static str {
        let mut buf = [0u8; 2048];
        loop {
            if *shutdown.borrow() {
                return "shutdown";
            }
            let read = tokio::select! {
                _ = shutdown.changed() => return "shutdown",
                r = tokio::time::timeout(self.idle_timeout, self.stream.read(&mut buf)) => r,
            };
            let n = match read {
                Err(_) => return "timeout",
                Ok(Ok(0)) => return "eof",
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::warn!(edge = %self.id, peer = %self.addr, error = %e, "Edge read failed");
                    return "read error";
                }
            };

            self.registry.touch(self.id).await;
            for line in self.framer.push(&buf[..n]) {
                // Stray non-JSON text is tolerated on this port.
                if !line.starts_with('{') {
                    continue;
                }
                let cmd = match EdgeCommand::parse(&line) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        tracing::debug!(
                            edge = %self.id,
                            peer = %self.addr,
                            error = %e,
                            "Ignoring malformed discovery line"
                        );
                        continue;
                    }
                };
                if let Err(e) = self.apply(cmd).await {
                    tracing::warn!(edge = %self.id, peer = %self.addr, error = %e, "Edge write failed");
                    return "write error";
                }
            }
        }
    }

    async fn apply(&mut self, cmd: EdgeCommand) -> io::Result<()> {
        match cmd {
            EdgeCommand::Helo {
                id,
                svc,
                port,
                data,
                caps,
            } => {
                if let Err(e) = self
                    .registry
                    .register(self.id, &id, &svc, port, data, &caps)
                    .await
                {
                    // Table refusals affect only this advertisement; the
                    // session stays up.
                    tracing::warn!(edge = %self.id, error = %e, "Service registration refused");
                }
                Ok(())
            }
            EdgeCommand::Bye { id, svc } => {
                self.registry
                    .unregister(self.id, &id, svc.as_deref())
                    .await;
                Ok(())
            }
            EdgeCommand::List => self.respond(None).await,
            EdgeCommand::Find { svc } => self.respond(Some(&svc)).await,
        }
    }

    /// Send the (optionally filtered) service table as one JSON line. The
    /// snapshot is taken before the write, so later registrations on other
    /// edges never leak into this response.
    async fn respond(&mut self, filter: Option<&str>) -> io::Result<()> {
        let services = self.registry.list(filter).await;
        let line = match ListReply::new(services).to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(edge = %self.id, error = %e, "Failed to encode listing");
                return Ok(());
            }
        };
        tokio::time::timeout(
            RESPONSE_WRITE_TIMEOUT,
            self.stream.write_all(line.as_bytes()),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "response write timed out"))?
    }
}
