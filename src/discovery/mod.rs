//! TCP service discovery for edge nodes behind NAT
//!
//! Edge nodes hold a long-lived connection to the relay and advertise
//! their locally-discovered services over newline-delimited JSON; clients
//! (which are just edges that only ever query) use `list`/`find` to locate
//! services they cannot reach directly.
//!
//! ```text
//!    edge A ──helo──►┐
//!    edge B ──helo──►│  DiscoveryRegistry        client ──list──► [table
//!    edge C ──bye───►│  (edges ⇆ services)                         snapshot]
//!                    └── timeout sweep: silence > 120 s drops the
//!                        edge and its services together
//! ```

pub mod framer;
pub mod registry;
pub mod session;
pub mod wire;

pub use framer::LineFramer;
pub use registry::{DiscoveryRegistry, EdgeId, RegistryConfig, RegistryError};
pub use session::EdgeSession;
pub use wire::{EdgeCommand, ListReply, ServiceAd};
