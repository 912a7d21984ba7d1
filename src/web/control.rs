//! Inbound viewer message dispatch

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::input::{Gesture, Point, KEYCODE_APP_SWITCH, KEYCODE_BACK, KEYCODE_HOME};
use crate::protocol::{ControlMessage, KeyAction, Outbound, TouchAction};
use crate::state::AppState;
use crate::stream::ViewerId;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Routes one viewer's control messages
///
/// Nothing a viewer sends can close its connection from here; bad input is
/// logged and dropped.
pub struct ControlRouter {
    state: Arc<AppState>,
    viewer: ViewerId,
    reply: mpsc::Sender<Outbound>,
    throttler: LogThrottler,
}

impl ControlRouter {
    pub fn new(state: Arc<AppState>, viewer: ViewerId, reply: mpsc::Sender<Outbound>) -> Self {
        Self {
            state,
            viewer,
            reply,
            throttler: LogThrottler::with_secs(5),
        }
    }

    pub async fn handle_text(&self, text: &str) {
        match ControlMessage::parse(text) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                warn_throttled!(
                    self.throttler,
                    "invalid_message",
                    "Invalid control message from viewer {}: {}",
                    self.viewer,
                    e
                );
            }
        }
    }

    pub async fn dispatch(&self, message: ControlMessage) {
        match message {
            ControlMessage::Touch { action, x, y } => self.handle_touch(action, Point::new(x, y)).await,
            ControlMessage::Key {
                keycode,
                action: KeyAction::Down,
            } => self.press_key(keycode).await,
            // The device command is a full press, already sent on down
            ControlMessage::Key {
                action: KeyAction::Up,
                ..
            } => {}
            ControlMessage::Back => {
                info!("Back button pressed");
                self.press_key(KEYCODE_BACK).await;
            }
            ControlMessage::Home => {
                info!("Home button pressed");
                self.press_key(KEYCODE_HOME).await;
            }
            ControlMessage::Recents => {
                info!("Recents button pressed");
                self.press_key(KEYCODE_APP_SWITCH).await;
            }
            ControlMessage::Chat { message } => {
                info!("Chat message from viewer {}: {}", self.viewer, preview(&message));
                let agent = self.state.agent.clone();
                let reply = self.reply.clone();
                tokio::spawn(async move {
                    agent.chat(&message, &reply).await;
                });
            }
            ControlMessage::Cancel => {
                info!("Cancel requested by viewer {}", self.viewer);
                self.state.agent.cancel().await;
            }
            ControlMessage::NewSession => {
                info!("New session requested by viewer {}", self.viewer);
                self.state.agent.new_session(&self.reply).await;
            }
        }
    }

    async fn handle_touch(&self, action: TouchAction, point: Point) {
        if !point.is_normalized() {
            warn_throttled!(
                self.throttler,
                "touch_range",
                "Touch coordinates out of range: ({}, {})",
                point.x,
                point.y
            );
            return;
        }
        debug!("Touch {:?} at ({:.3}, {:.3})", action, point.x, point.y);

        let config = self.state.config.get();
        let gesture = self
            .state
            .hub
            .with_pointer(&self.viewer, |tracker| {
                tracker.handle(action, point, Instant::now(), &config.gesture)
            })
            .flatten();
        let Some(gesture) = gesture else {
            return;
        };

        match gesture {
            Gesture::Tap(at) => info!("Tap at ({:.3}, {:.3})", at.x, at.y),
            Gesture::Swipe { from, to } => info!(
                "Swipe ({:.3}, {:.3}) -> ({:.3}, {:.3})",
                from.x, from.y, to.x, to.y
            ),
        }
        if let Err(e) = self
            .state
            .input
            .perform(gesture, config.gesture.swipe_duration_ms)
            .await
        {
            warn!("Failed to inject gesture: {}", e);
        }
    }

    async fn press_key(&self, keycode: i32) {
        debug!("Key press {}", keycode);
        if let Err(e) = self.state.input.press_key(keycode).await {
            warn!("Failed to send key {}: {}", keycode, e);
        }
    }
}

fn preview(message: &str) -> &str {
    match message.char_indices().nth(50) {
        Some((end, _)) => &message[..end],
        None => message,
    }
}
