//! Device input trait definition

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Physical screen resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    /// Used when the device will not report its size
    pub const FALLBACK: Self = Self {
        width: 1080,
        height: 2340,
    };
}

/// Device command interface
///
/// Coordinates are device pixels. Each call is one complete command; there is
/// no separate press/release phase.
#[async_trait]
pub trait DeviceInput: Send + Sync {
    /// Get backend name
    fn name(&self) -> &'static str;

    async fn tap(&self, x: u32, y: u32) -> Result<()>;

    async fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u32) -> Result<()>;

    /// Full press of an Android key code
    async fn key_event(&self, keycode: i32) -> Result<()>;

    /// Query the physical resolution
    async fn screen_size(&self) -> Result<ScreenSize>;
}
