//! Per-consumer byte ring
//!
//! Fixed capacity, overwrite-oldest. Writes always succeed so the producer
//! keeps forward progress no matter how stalled a consumer is; the stalled
//! consumer just loses the oldest bytes, and the loss is counted.

/// Fixed-capacity FIFO byte buffer that discards the oldest data on overflow
#[derive(Debug)]
pub struct RingBuffer {
    data: Box<[u8]>,
    read_idx: usize,
    write_idx: usize,
    count: usize,
    overflow_bytes: u64,
}

impl RingBuffer {
    /// Allocate a ring holding up to `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be nonzero");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_idx: 0,
            write_idx: 0,
            count: 0,
            overflow_bytes: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total bytes discarded to make room since creation
    pub fn overflow_bytes(&self) -> u64 {
        self.overflow_bytes
    }

    /// Append `src`, discarding the oldest bytes if capacity would be
    /// exceeded. The whole slice is always consumed.
    pub fn write(&mut self, src: &[u8]) {
        let cap = self.data.len();

        if src.len() >= cap {
            // Everything currently held plus the leading part of `src` is lost.
            self.overflow_bytes += (self.count + src.len() - cap) as u64;
            self.data.copy_from_slice(&src[src.len() - cap..]);
            self.read_idx = 0;
            self.write_idx = 0;
            self.count = cap;
            return;
        }

        let free = cap - self.count;
        if src.len() > free {
            let dropped = src.len() - free;
            self.read_idx = (self.read_idx + dropped) % cap;
            self.count -= dropped;
            self.overflow_bytes += dropped as u64;
        }

        let first = (cap - self.write_idx).min(src.len());
        self.data[self.write_idx..self.write_idx + first].copy_from_slice(&src[..first]);
        if src.len() > first {
            self.data[..src.len() - first].copy_from_slice(&src[first..]);
        }
        self.write_idx = (self.write_idx + src.len()) % cap;
        self.count += src.len();
    }

    /// Pop up to `dst.len()` of the oldest bytes into `dst`, FIFO order.
    /// Returns the number of bytes copied.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.count);
        let cap = self.data.len();

        let first = (cap - self.read_idx).min(n);
        dst[..first].copy_from_slice(&self.data[self.read_idx..self.read_idx + first]);
        if n > first {
            dst[first..n].copy_from_slice(&self.data[..n - first]);
        }
        self.read_idx = (self.read_idx + n) % cap;
        self.count -= n;
        n
    }

    /// Push bytes just taken by [`read`](Self::read) back to the front,
    /// restoring FIFO order after a short socket write. The caller must not
    /// have written in between, so the space those bytes occupied is free.
    pub fn unread(&mut self, src: &[u8]) {
        let cap = self.data.len();
        debug_assert!(self.count + src.len() <= cap);

        // Stepping back src.len() positions; % cap handles a full-ring unread.
        self.read_idx = (self.read_idx + cap - src.len() % cap) % cap;
        let first = (cap - self.read_idx).min(src.len());
        self.data[self.read_idx..self.read_idx + first].copy_from_slice(&src[..first]);
        if src.len() > first {
            self.data[..src.len() - first].copy_from_slice(&src[first..]);
        }
        self.count += src.len();
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn drain(ring: &mut RingBuffer) -> Vec<u8> {
        let mut out = vec![0u8; ring.len()];
        let n = ring.read(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn test_fifo_order() {
        let mut ring = RingBuffer::new(16);
        ring.write(b"hello ");
        ring.write(b"world");

        assert_eq!(ring.len(), 11);
        assert_eq!(drain(&mut ring), b"hello world");
        assert_eq!(ring.overflow_bytes(), 0);
    }

    #[test]
    fn test_exact_capacity_write() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(ring.len(), 8);
        assert_eq!(ring.overflow_bytes(), 0);
        assert_eq!(drain(&mut ring), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_one_byte_overflow() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);

        assert_eq!(ring.len(), 8);
        assert_eq!(ring.overflow_bytes(), 1);
        // Contents are the last `capacity` bytes written.
        assert_eq!(drain(&mut ring), &[2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_overflow_discards_oldest() {
        let mut ring = RingBuffer::new(4);
        ring.write(b"abcd");
        ring.write(b"ef");

        assert_eq!(ring.overflow_bytes(), 2);
        assert_eq!(drain(&mut ring), b"cdef");
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let mut ring = RingBuffer::new(4);
        ring.write(b"xy");
        ring.write(b"0123456789");

        // 2 buffered + 6 excess bytes lost
        assert_eq!(ring.overflow_bytes(), 8);
        assert_eq!(drain(&mut ring), b"6789");
    }

    #[test]
    fn test_wraparound() {
        let mut ring = RingBuffer::new(8);
        ring.write(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(ring.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");

        // Write index wraps past the end of the backing slice.
        ring.write(b"ghijk");
        assert_eq!(ring.overflow_bytes(), 0);
        assert_eq!(drain(&mut ring), b"efghijk");
    }

    #[test]
    fn test_unread_restores_order() {
        let mut ring = RingBuffer::new(8);
        ring.write(b"abcdef");

        let mut buf = [0u8; 4];
        ring.read(&mut buf);
        // Socket took only one byte; the rest goes back to the front.
        ring.unread(&buf[1..4]);

        assert_eq!(drain(&mut ring), b"bcdef");
    }

    #[test]
    fn test_unread_across_wrap() {
        let mut ring = RingBuffer::new(6);
        ring.write(b"abcdef");
        let mut buf = [0u8; 3];
        ring.read(&mut buf);
        ring.write(b"gh");

        let mut chunk = [0u8; 5];
        let n = ring.read(&mut chunk);
        assert_eq!(&chunk[..n], b"defgh");
        ring.unread(&chunk[2..n]);

        assert_eq!(drain(&mut ring), b"fgh");
    }

    #[test]
    fn test_reads_after_write_burst_are_a_suffix_of_writes() {
        let mut rng = StdRng::seed_from_u64(0x5164);
        let mut ring = RingBuffer::new(64);
        let mut written = Vec::new();
        let mut next = 0u8;

        for _ in 0..50 {
            let len = rng.gen_range(0..100);
            let chunk: Vec<u8> = (0..len)
                .map(|_| {
                    next = next.wrapping_add(1);
                    next
                })
                .collect();
            written.extend_from_slice(&chunk);
            ring.write(&chunk);
        }

        let survivors = drain(&mut ring);
        assert!(written.ends_with(&survivors));
        assert_eq!(
            ring.overflow_bytes(),
            (written.len() - survivors.len()) as u64
        );
    }

    #[test]
    fn test_interleaved_accounting() {
        let mut rng = StdRng::seed_from_u64(0x1207);
        let mut ring = RingBuffer::new(32);
        let mut total_written = 0u64;
        let mut total_read = 0u64;

        for _ in 0..500 {
            if rng.gen_bool(0.6) {
                let len = rng.gen_range(0..48);
                let chunk: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                ring.write(&chunk);
                total_written += len as u64;
            } else {
                let mut buf = vec![0u8; rng.gen_range(1..40)];
                total_read += ring.read(&mut buf) as u64;
            }

            // Every byte ever written is accounted for: delivered, still
            // buffered, or counted as overflow loss.
            assert!(ring.len() <= ring.capacity());
            assert_eq!(
                total_written,
                total_read + ring.len() as u64 + ring.overflow_bytes()
            );
        }
    }

    #[test]
    #[should_panic(expected = "nonzero")]
    fn test_zero_capacity_rejected() {
        RingBuffer::new(0);
    }
}
