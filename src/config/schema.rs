use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Device and scrcpy-server settings
    pub device: DeviceConfig,
    /// Viewer-facing WebSocket server settings
    pub web: WebConfig,
    /// Tap/swipe disambiguation thresholds
    pub gesture: GestureConfig,
    /// Conversational agent settings
    pub agent: AgentConfig,
}

impl AppConfig {
    /// Validate value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.device.max_size == 0 {
            return Err("device.max_size must be greater than 0".into());
        }
        if self.device.max_fps == 0 {
            return Err("device.max_fps must be greater than 0".into());
        }
        if self.device.connect_attempts == 0 {
            return Err("device.connect_attempts must be greater than 0".into());
        }
        if self.web.viewer_queue < 8 {
            return Err("web.viewer_queue must be at least 8".into());
        }
        self.gesture.validate()
    }
}

/// Device / capture process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// ADB serial; first attached device when unset
    pub serial: Option<String>,
    /// Path to the adb executable
    pub adb_path: String,
    /// Local scrcpy-server artifact; downloaded when unset and not cached
    pub server_path: Option<String>,
    /// scrcpy-server protocol version
    pub server_version: String,
    /// Local TCP port forwarded to the device's abstract socket
    pub forward_port: u16,
    /// Max video dimension in pixels
    pub max_size: u32,
    /// Video bitrate in bits per second
    pub bitrate: u32,
    /// Max frames per second
    pub max_fps: u32,
    /// Video socket connect attempts
    pub connect_attempts: u32,
    /// Delay between connect attempts
    pub connect_interval_ms: u64,
    /// Delay before redeploying after the stream drops
    pub reconnect_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            adb_path: "adb".to_string(),
            server_path: None,
            server_version: "2.4".to_string(),
            forward_port: 27183,
            max_size: 1080,
            bitrate: 4_000_000,
            max_fps: 60,
            connect_attempts: 30,
            connect_interval_ms: 100,
            reconnect_delay_ms: 1000,
        }
    }
}

impl DeviceConfig {
    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// WebSocket / HTTP port
    pub port: u16,
    /// Max inbound WebSocket message size in bytes
    pub max_message_size: usize,
    /// A viewer whose queue stays full this long is dropped
    pub send_timeout_ms: u64,
    /// Per-viewer outbound queue capacity
    pub viewer_queue: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8765,
            max_message_size: 1 << 20,
            send_timeout_ms: 2000,
            viewer_queue: 256,
        }
    }
}

impl WebConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Upper bound for gesture durations
const MAX_GESTURE_SECS: f64 = 3600.0;

/// Gesture classification thresholds, in normalized screen units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GestureConfig {
    /// Minimum travel for a slow drag to count as a swipe
    pub swipe_distance_threshold: f64,
    /// Normalized units per second above which a gesture is a swipe
    pub swipe_velocity_threshold: f64,
    /// Presses held longer than this (seconds) may be drags
    pub max_tap_duration_secs: f64,
    /// Unresolved pointer-down state expires after this many seconds
    pub touch_timeout_secs: f64,
    /// Duration of the injected swipe
    pub swipe_duration_ms: u32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            swipe_distance_threshold: 0.03,
            swipe_velocity_threshold: 0.5,
            max_tap_duration_secs: 0.4,
            touch_timeout_secs: 5.0,
            swipe_duration_ms: 200,
        }
    }
}

impl GestureConfig {
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("swipe_distance_threshold", self.swipe_distance_threshold),
            ("swipe_velocity_threshold", self.swipe_velocity_threshold),
            ("max_tap_duration_secs", self.max_tap_duration_secs),
            ("touch_timeout_secs", self.touch_timeout_secs),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("gesture.{} must be a positive number", name));
            }
        }
        for (name, value) in [
            ("max_tap_duration_secs", self.max_tap_duration_secs),
            ("touch_timeout_secs", self.touch_timeout_secs),
        ] {
            if value > MAX_GESTURE_SECS {
                return Err(format!(
                    "gesture.{} must be at most {} seconds",
                    name, MAX_GESTURE_SECS
                ));
            }
        }
        Ok(())
    }

    pub fn touch_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.touch_timeout_secs)
            .unwrap_or(Duration::from_secs(MAX_GESTURE_SECS as u64))
    }
}

/// Conversational agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the agent service; chat is disabled when unset
    pub endpoint: Option<String>,
    /// Conversation thread shared by all viewers
    pub thread_id: String,
    /// How long to wait for the worker after an interrupt
    pub settle_timeout_ms: u64,
    /// Upper bound for a single invocation
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            thread_id: "ios-session".to_string(),
            settle_timeout_ms: 2000,
            request_timeout_secs: 600,
        }
    }
}

impl AgentConfig {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}
