use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent::AgentBridge;
use crate::config::ConfigStore;
use crate::device::DeviceInfo;
use crate::input::InputController;
use crate::stream::{BroadcastHub, HubStatus};

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Viewer registry and video fan-out
    pub hub: Arc<BroadcastHub>,
    /// Gesture and key execution on the device
    pub input: Arc<InputController>,
    /// Serialized access to the conversational agent
    pub agent: Arc<AgentBridge>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Payload of `GET /api/info`
#[derive(Debug, Serialize)]
pub struct BridgeInfo {
    pub device: Option<DeviceInfo>,
    pub stream: HubStatus,
    pub input_backend: &'static str,
    pub agent: &'static str,
    pub agent_busy: bool,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        hub: Arc<BroadcastHub>,
        input: Arc<InputController>,
        agent: Arc<AgentBridge>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            input,
            agent,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn info(&self) -> BridgeInfo {
        BridgeInfo {
            device: self.hub.device_info(),
            stream: self.hub.status(),
            input_backend: self.input.backend_name(),
            agent: self.agent.agent_name(),
            agent_busy: self.agent.is_busy(),
        }
    }
}
