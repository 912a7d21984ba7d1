//! Tap vs. swipe disambiguation
//!
//! Viewers send raw pointer-down/up pairs; the device only understands
//! discrete `input tap` / `input swipe` commands. Each viewer gets its own
//! [`GestureTracker`] so interleaved touches from two viewers never pair up.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::GestureConfig;
use crate::protocol::TouchAction;

/// Normalized screen position, both axes in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_normalized(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// A resolved gesture, in normalized coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Tap(Point),
    Swipe { from: Point, to: Point },
}

#[derive(Debug, Clone, Copy)]
struct PointerDown {
    at: Point,
    since: Instant,
}

/// Per-viewer pointer state
#[derive(Debug, Default)]
pub struct GestureTracker {
    pending: Option<PointerDown>,
}

impl GestureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one pointer event; returns a gesture when a down/up pair completes
    pub fn handle(
        &mut self,
        action: TouchAction,
        point: Point,
        now: Instant,
        config: &GestureConfig,
    ) -> Option<Gesture> {
        if let Some(down) = self.pending {
            let held = now.saturating_duration_since(down.since);
            if held > config.touch_timeout() {
                warn!(
                    "Touch cancelled: held for {:.1}s (>{:.1}s timeout)",
                    held.as_secs_f64(),
                    config.touch_timeout_secs
                );
                self.pending = None;
            }
        }

        match action {
            TouchAction::Down => {
                self.pending = Some(PointerDown {
                    at: point,
                    since: now,
                });
                None
            }
            TouchAction::Move => None,
            TouchAction::Up => {
                let down = self.pending.take()?;
                let elapsed = now.saturating_duration_since(down.since);
                Some(classify(down.at, point, elapsed, config))
            }
        }
    }

    /// Whether a pointer-down is waiting for its pointer-up
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Classify a completed down/up pair
///
/// Fast movement is a swipe even over a short distance; slow movement is a
/// swipe only when it both travels and is held past the tap duration.
pub fn classify(from: Point, to: Point, elapsed: Duration, config: &GestureConfig) -> Gesture {
    let distance = from.distance_to(&to);
    let duration = elapsed.as_secs_f64();
    let velocity = if duration > 0.0 {
        distance / duration
    } else {
        0.0
    };

    let is_swipe = velocity > config.swipe_velocity_threshold
        || (distance > config.swipe_distance_threshold
            && duration > config.max_tap_duration_secs);

    if is_swipe {
        Gesture::Swipe { from, to }
    } else {
        Gesture::Tap(to)
    }
}
