//! Attached stream consumers
//!
//! Each consumer owns its socket and a ring sized for ~30 s of stream
//! data. `broadcast` copies into every ring and never blocks; a periodic
//! `drain` moves ring contents toward the sockets with `try_write`, so one
//! jammed consumer cannot stall the producer or its peers. The 16-byte
//! stream header always goes out before any data bytes.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;

use crate::error::RelayError;
use crate::protocol::{StreamHeader, HEADER_LEN};
use crate::stream::ring::RingBuffer;

/// Bytes moved from a ring to its socket per drain step
const DRAIN_CHUNK: usize = 8192;

/// Probe size used to detect inbound bytes on an attached connection
const PROBE_CHUNK: usize = 4096;

/// One attached stream subscriber
#[derive(Debug)]
pub struct Consumer {
    stream: TcpStream,
    addr: SocketAddr,
    ring: RingBuffer,
    header_pos: usize,
    connected_at: Instant,
    bytes_delivered: u64,
}

impl Consumer {
    fn new(stream: TcpStream, addr: SocketAddr, ring_capacity: usize) -> Self {
        Self {
            stream,
            addr,
            ring: RingBuffer::new(ring_capacity),
            header_pos: 0,
            connected_at: Instant::now(),
            bytes_delivered: 0,
        }
    }

    /// Move pending bytes toward the socket until it stops accepting them.
    /// An error other than `WouldBlock` is fatal for this consumer.
    fn pump(&mut self, header: &[u8; HEADER_LEN]) -> io::Result<()> {
        while self.header_pos < HEADER_LEN {
            match self.stream.try_write(&header[self.header_pos..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.header_pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        let mut chunk = [0u8; DRAIN_CHUNK];
        loop {
            let n = self.ring.read(&mut chunk);
            if n == 0 {
                return Ok(());
            }
            match self.stream.try_write(&chunk[..n]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => {
                    self.bytes_delivered += written as u64;
                    if written < n {
                        // Short write: the unsent tail goes back to the front
                        // of the ring so FIFO order is preserved.
                        self.ring.unread(&chunk[written..n]);
                        return Ok(());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.ring.unread(&chunk[..n]);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The set of consumers attached to one stream
#[derive(Debug)]
pub struct ConsumerSet {
    stream_name: &'static str,
    consumers: Vec<Consumer>,
    header: [u8; HEADER_LEN],
    ring_capacity: usize,
    max_consumers: usize,
}

impl ConsumerSet {
    pub fn new(
        stream_name: &'static str,
        header: StreamHeader,
        ring_capacity: usize,
        max_consumers: usize,
    ) -> Self {
        Self {
            stream_name,
            consumers: Vec::new(),
            header: header.encode(),
            ring_capacity,
            max_consumers,
        }
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Attach a new consumer. The socket is closed (dropped) when the set
    /// is at its cap.
    pub fn attach(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<(), RelayError> {
        if self.consumers.len() >= self.max_consumers {
            return Err(RelayError::ConsumerLimit(self.max_consumers));
        }
        self.consumers.push(Consumer::new(stream, addr, self.ring_capacity));
        tracing::info!(
            stream = self.stream_name,
            peer = %addr,
            consumers = self.consumers.len(),
            "Consumer attached"
        );
        Ok(())
    }

    /// Write `data` into every attached ring. Never fails; a slow consumer
    /// absorbs the loss via ring overflow.
    pub fn broadcast(&mut self, data: &[u8]) {
        for consumer in &mut self.consumers {
            consumer.ring.write(data);
        }
    }

    /// Move pending bytes toward every consumer socket, evicting consumers
    /// whose sockets fail with anything but `WouldBlock`.
    pub fn drain(&mut self) {
        let mut i = self.consumers.len();
        while i > 0 {
            i -= 1;
            if let Err(e) = self.consumers[i].pump(&self.header) {
                self.remove(i, Some(&e));
            }
        }
    }

    /// Probe every consumer socket for inbound bytes. On this protocol
    /// consumers are passive, so a connection that sends data is the stream
    /// producer announcing itself on the shared port: it is detached and
    /// handed back together with the bytes it sent. Consumers that reached
    /// EOF or errored are dropped.
    pub fn take_sender(&mut self) -> Option<(TcpStream, SocketAddr, Vec<u8>)> {
        let mut i = self.consumers.len();
        while i > 0 {
            i -= 1;
            let mut probe = [0u8; PROBE_CHUNK];
            match self.consumers[i].stream.try_read(&mut probe) {
                Ok(0) => self.remove(i, None),
                Ok(n) => {
                    let consumer = self.consumers.swap_remove(i);
                    return Some((consumer.stream, consumer.addr, probe[..n].to_vec()));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => self.remove(i, Some(&e)),
            }
        }
        None
    }

    fn remove(&mut self, idx: usize, error: Option<&io::Error>) {
        let consumer = self.consumers.swap_remove(idx);
        let uptime = consumer.connected_at.elapsed().as_secs();
        match error {
            Some(e) => tracing::info!(
                stream = self.stream_name,
                peer = %consumer.addr,
                error = %e,
                delivered = consumer.bytes_delivered,
                lost = consumer.ring.overflow_bytes(),
                uptime_secs = uptime,
                "Consumer dropped"
            ),
            None => tracing::info!(
                stream = self.stream_name,
                peer = %consumer.addr,
                delivered = consumer.bytes_delivered,
                lost = consumer.ring.overflow_bytes(),
                uptime_secs = uptime,
                "Consumer disconnected"
            ),
        }
    }
}
