//! Command channel relay between the edge node and a remote controller

pub mod bridge;

pub use bridge::ControlBridge;
