//! Hub-and-spoke signal relay for SDR edge nodes
//!
//! Sits on a public host and glues private-network SDR edges to remote
//! consumers. Three jobs share the process:
//!
//! - fan two float32 I/Q streams (a ~50 kHz detector stream and a ~12 kHz
//!   display stream) out from a single producer to many consumers, with a
//!   per-consumer ring absorbing short stalls,
//! - bridge one text command channel between the edge and one remote
//!   controller,
//! - keep the TCP service registry that edges advertise into and clients
//!   query to find services behind NAT.
//!
//! ```text
//!                          RelayServer
//!          ┌────────────────────────────────────────────┐
//!   edge ──┤ :4410 detector ──► consumers               │
//!   edge ──┤ :4411 display  ──► consumers               │
//!   edge ──┤ :4409 control  ◄─► controller              │
//!   edge ──┤ :5401 discovery ──► registry ◄── list/find │
//!          └────────────────────────────────────────────┘
//! ```
//!
//! See [`RelayServer`] for the entry point and [`RelayConfig`] for the
//! tunables. All state is in-memory; nothing survives a restart.

pub mod control;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod stream;

pub use error::{RelayError, Result};
pub use server::{RelayConfig, RelayServer};
