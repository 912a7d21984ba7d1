//! Device input
//!
//! Normalized viewer coordinates are resolved into gestures per viewer
//! ([`GestureTracker`]) and executed in device pixels through a
//! [`DeviceInput`] backend.

pub mod adb;
pub mod backend;
pub mod gesture;

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

pub use adb::AdbInput;
pub use backend::{DeviceInput, ScreenSize};
pub use gesture::{Gesture, GestureTracker, Point};

use crate::error::Result;

/// Android key codes for the navigation buttons
pub const KEYCODE_HOME: i32 = 3;
pub const KEYCODE_BACK: i32 = 4;
pub const KEYCODE_APP_SWITCH: i32 = 187;

/// Executes gestures and key presses against the device
pub struct InputController {
    device: Arc<dyn DeviceInput>,
    screen: OnceCell<ScreenSize>,
}

impl InputController {
    pub fn new(device: Arc<dyn DeviceInput>) -> Self {
        Self {
            device,
            screen: OnceCell::new(),
        }
    }

    /// Physical resolution, queried once
    pub async fn screen_size(&self) -> ScreenSize {
        *self
            .screen
            .get_or_init(|| async {
                match self.device.screen_size().await {
                    Ok(size) => {
                        info!("Device screen size: {}x{}", size.width, size.height);
                        size
                    }
                    Err(e) => {
                        warn!(
                            "Failed to query screen size ({}), assuming {}x{}",
                            e,
                            ScreenSize::FALLBACK.width,
                            ScreenSize::FALLBACK.height
                        );
                        ScreenSize::FALLBACK
                    }
                }
            })
            .await
    }

    pub async fn perform(&self, gesture: Gesture, swipe_duration_ms: u32) -> Result<()> {
        let screen = self.screen_size().await;
        match gesture {
            Gesture::Tap(at) => {
                let (x, y) = to_pixels(at, screen);
                self.device.tap(x, y).await
            }
            Gesture::Swipe { from, to } => {
                self.device
                    .swipe(
                        to_pixels(from, screen),
                        to_pixels(to, screen),
                        swipe_duration_ms,
                    )
                    .await
            }
        }
    }

    pub async fn press_key(&self, keycode: i32) -> Result<()> {
        self.device.key_event(keycode).await
    }

    pub fn backend_name(&self) -> &'static str {
        self.device.name()
    }
}

/// Map a normalized point onto the pixel grid
pub fn to_pixels(point: Point, screen: ScreenSize) -> (u32, u32) {
    let axis = |v: f64, len: u32| ((v * len as f64) as u32).min(len.saturating_sub(1));
    (axis(point.x, screen.width), axis(point.y, screen.height))
}
