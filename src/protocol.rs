//! Viewer wire protocol
//!
//! Text frames carry `type`-tagged JSON in both directions. Binary frames
//! flow server→viewer only and carry exactly one Annex-B NAL unit, start code
//! included.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;

/// Pointer phase of a touch event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchAction {
    Down,
    Move,
    Up,
}

/// Key phase of a key event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Down,
    Up,
}

/// Viewer-to-server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Normalized pointer event, `x`/`y` in [0, 1]
    Touch { action: TouchAction, x: f64, y: f64 },
    /// Android key code
    Key { keycode: i32, action: KeyAction },
    Back,
    Home,
    Recents,
    Chat {
        #[serde(default)]
        message: String,
    },
    Cancel,
    NewSession,
}

impl ControlMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Device connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Server-to-viewer JSON messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DeviceInfo(DeviceInfo),
    DeviceStatus {
        state: DeviceState,
    },
    AgentStatus {
        status: String,
    },
    AgentStep {
        /// "thinking", "tool_call", "tool_result" or "response"
        step_type: String,
        content: String,
        metadata: serde_json::Value,
    },
    AgentResponse {
        content: String,
        done: bool,
    },
    AgentError {
        error: String,
    },
    SessionCleared {
        message: String,
    },
}

impl ServerMessage {
    pub fn thinking() -> Self {
        Self::AgentStatus {
            status: "thinking".to_string(),
        }
    }

    /// Terminal event of a chat turn
    pub fn done() -> Self {
        Self::AgentResponse {
            content: String::new(),
            done: true,
        }
    }

    pub fn agent_error(error: impl Into<String>) -> Self {
        Self::AgentError {
            error: error.into(),
        }
    }
}

/// One item in a viewer's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Json(ServerMessage),
    Video(Bytes),
}

impl From<ServerMessage> for Outbound {
    fn from(msg: ServerMessage) -> Self {
        Self::Json(msg)
    }
}
