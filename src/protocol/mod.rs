//! Wire format shared with the SDR edge tools
//!
//! A stream connection opens with one 16-byte `FT32` header and then
//! carries `DATA` frames. The relay emits only the stream header itself;
//! data frames are produced upstream and forwarded verbatim, so frame
//! alignment is the producer's contract.

use bytes::Buf;

/// "FT32", float32 I/Q stream header
pub const MAGIC_FT32: u32 = 0x4654_3332;

/// "DATA", float32 I/Q data frame
pub const MAGIC_DATA: u32 = 0x4441_5441;

/// Encoded size of both header types
pub const HEADER_LEN: usize = 16;

/// Bytes per interleaved I/Q pair (two little-endian f32s)
pub const BYTES_PER_SAMPLE: usize = 8;

/// Stream header, sent exactly once per consumer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// Sample rate in Hz (50 000 for the detector stream, 12 000 for display)
    pub sample_rate: u32,
}

impl StreamHeader {
    /// Create a header for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Encode as 16 little-endian bytes (magic, rate, two reserved words)
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC_FT32.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf
    }

    /// Decode from the start of `buf`; `None` on short input or bad magic
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN || buf.get_u32_le() != MAGIC_FT32 {
            return None;
        }
        Some(Self {
            sample_rate: buf.get_u32_le(),
        })
    }
}

/// Header of a producer-emitted data frame
///
/// The relay never parses these on the fast path; this type exists for
/// client-side tooling and for exercising the relay in tests. The header
/// is followed by `num_samples * 8` bytes of interleaved I/Q.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrameHeader {
    /// Frame counter assigned by the producer
    pub sequence: u32,
    /// I/Q pairs in the frame
    pub num_samples: u32,
    /// Producer-defined flags
    pub flags: u32,
}

impl DataFrameHeader {
    /// Encode as 16 little-endian bytes
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC_DATA.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_samples.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// Decode from the start of `buf`; `None` on short input or bad magic
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN || buf.get_u32_le() != MAGIC_DATA {
            return None;
        }
        Some(Self {
            sequence: buf.get_u32_le(),
            num_samples: buf.get_u32_le(),
            flags: buf.get_u32_le(),
        })
    }

    /// Payload size in bytes for this frame
    pub fn payload_len(&self) -> usize {
        self.num_samples as usize * BYTES_PER_SAMPLE
    }
}
