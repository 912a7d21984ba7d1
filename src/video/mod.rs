//! H.264 stream handling
//!
//! - `nal` - Annex-B framing and the late-joiner cache
//! - `pump` - the read/frame/broadcast loop and device reconnect

pub mod nal;
pub mod pump;

pub use nal::{NalFramer, NalType, NalUnit, StreamCache};
pub use pump::{StreamEnd, StreamForwarder, VideoPump};
