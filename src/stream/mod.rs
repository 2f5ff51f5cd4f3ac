//! Stream fan-out: one producer in, many consumers out
//!
//! ```text
//!                      StreamRelay (one task per stream)
//!                 ┌──────────────────────────────────────┐
//!   producer ───► │ recv ──► ConsumerSet::broadcast      │
//!                 │            │ ring   │ ring   │ ring  │
//!                 │            ▼        ▼        ▼       │
//!                 │          drain    drain    drain     │
//!                 └────────────│────────│────────│───────┘
//!                              ▼        ▼        ▼
//!                          consumer  consumer  consumer
//! ```
//!
//! Back-pressure is absorbed per consumer: each ring overwrites its oldest
//! bytes when the socket falls behind, so the producer is never throttled
//! and well-behaved consumers never see a peer's stall.

pub mod consumer;
pub mod relay;
pub mod ring;

pub use consumer::ConsumerSet;
pub use relay::StreamRelay;
pub use ring::RingBuffer;
