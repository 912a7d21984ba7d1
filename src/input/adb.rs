//! `adb shell input` backend

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::backend::{DeviceInput, ScreenSize};
use crate::device::Adb;
use crate::error::{AppError, Result};

const TAP_TIMEOUT: Duration = Duration::from_secs(2);
const KEY_TIMEOUT: Duration = Duration::from_secs(2);
/// Covers the swipe itself plus shell startup
const SWIPE_TIMEOUT: Duration = Duration::from_secs(3);
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Injects input through the device shell
pub struct AdbInput {
    adb: Adb,
}

impl AdbInput {
    pub fn new(adb: Adb) -> Self {
        Self { adb }
    }
}

#[async_trait]
impl DeviceInput for AdbInput {
    fn name(&self) -> &'static str {
        "adb"
    }

    async fn tap(&self, x: u32, y: u32) -> Result<()> {
        debug!("tap {},{}", x, y);
        self.adb
            .shell(&format!("input tap {} {}", x, y), TAP_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u32) -> Result<()> {
        debug!("swipe {:?} -> {:?} ({}ms)", from, to, duration_ms);
        let cmd = format!(
            "input swipe {} {} {} {} {}",
            from.0, from.1, to.0, to.1, duration_ms
        );
        self.adb.shell(&cmd, SWIPE_TIMEOUT).await.map(|_| ())
    }

    async fn key_event(&self, keycode: i32) -> Result<()> {
        debug!("keyevent {}", keycode);
        self.adb
            .shell(&format!("input keyevent {}", keycode), KEY_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn screen_size(&self) -> Result<ScreenSize> {
        let output = self.adb.shell("wm size", QUERY_TIMEOUT).await?;
        parse_wm_size(&output).ok_or_else(|| {
            AppError::adb("shell wm size", format!("unexpected output: {}", output.trim()))
        })
    }
}

/// Parse `wm size` output
///
/// The first `WxH` pair wins, which is the physical size when an override is
/// also reported.
pub fn parse_wm_size(output: &str) -> Option<ScreenSize> {
    output.split_whitespace().find_map(|token| {
        let (w, h) = token.split_once('x')?;
        let width = w.parse().ok()?;
        let height = h.parse().ok()?;
        (width > 0 && height > 0).then_some(ScreenSize { width, height })
    })
}
