//! Discovery wire protocol
//!
//! Newline-delimited JSON, UTF-8, one flat object per line. Inbound
//! commands come from edge nodes; the only outbound message is the
//! service listing sent in reply to `list` and `find`. Unknown fields are
//! tolerated everywhere so newer edges keep working against this relay.

use serde::{Deserialize, Serialize};

/// Marker carried by every outbound message
pub const PROTOCOL_MAGIC: &str = "PNSD";

/// Wire protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Byte bounds on edge-supplied strings; excess is truncated on registration
pub const MAX_ID_LEN: usize = 63;
pub const MAX_SVC_LEN: usize = 31;
pub const MAX_CAPS_LEN: usize = 127;

/// One inbound line from an edge node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum EdgeCommand {
    /// Announce (or refresh) a service
    Helo {
        id: String,
        svc: String,
        #[serde(default)]
        port: i32,
        #[serde(default)]
        data: i32,
        #[serde(default)]
        caps: String,
    },
    /// Withdraw one service, or every service with the given id
    Bye {
        id: String,
        #[serde(default)]
        svc: Option<String>,
    },
    /// Query the full service table
    List,
    /// Query services of one type
    Find { svc: String },
}

impl EdgeCommand {
    /// Parse one framed line. The caller has already filtered out lines
    /// that do not start with `{`.
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// One service in a listing reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAd {
    pub id: String,
    pub svc: String,
    /// Observed address of the owning edge, never edge-supplied
    pub ip: String,
    pub port: i32,
    pub data: i32,
    pub caps: String,
}

/// Reply to `list` and `find`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListReply {
    pub m: String,
    pub v: u32,
    pub cmd: String,
    pub services: Vec<ServiceAd>,
}

impl ListReply {
    pub fn new(services: Vec<ServiceAd>) -> Self {
        Self {
            m: PROTOCOL_MAGIC.to_string(),
            v: PROTOCOL_VERSION,
            cmd: "list".to_string(),
            services,
        }
    }

    /// Encode as one newline-terminated JSON line
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
