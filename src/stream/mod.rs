//! Viewer fan-out
//!
//! # Components
//!
//! - `BroadcastHub` - viewer registry, catch-up cache and NAL fan-out

pub mod hub;

pub use hub::{BroadcastHub, HubStatus, ViewerHandle, ViewerId};
