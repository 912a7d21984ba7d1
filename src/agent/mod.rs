//! Conversational agent integration
//!
//! The agent itself runs elsewhere; this module defines the seam
//! ([`Agent`]), an HTTP client for it, and [`AgentBridge`], which serializes
//! chat turns from all viewers onto the one shared conversation.

pub mod bridge;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use bridge::AgentBridge;
pub use http::HttpAgent;

use crate::error::{AppError, Result};

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Intermediate event produced while the agent works
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    /// "thinking", "tool_call", "tool_result" or "response"
    pub step_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl AgentStep {
    pub fn new(step_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            content: content.into(),
            metadata: empty_object(),
        }
    }
}

/// Final result of one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReply {
    pub content: String,
}

/// Where an invocation pushes its steps
#[derive(Debug, Clone)]
pub struct StepSink {
    tx: mpsc::Sender<AgentStep>,
}

impl StepSink {
    pub fn new(tx: mpsc::Sender<AgentStep>) -> Self {
        Self { tx }
    }

    /// Returns `false` once nobody is listening
    pub async fn push(&self, step: AgentStep) -> bool {
        self.tx.send(step).await.is_ok()
    }
}

/// External conversational agent
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one turn on `thread_id`, pushing steps into `steps` as they happen
    async fn invoke(&self, message: &str, thread_id: &str, steps: StepSink) -> Result<AgentReply>;

    /// Ask the in-flight invocation to stop early
    async fn interrupt(&self) -> Result<()>;

    /// Drop the conversation history of `thread_id`
    async fn clear_session(&self, thread_id: &str) -> Result<()>;
}

/// Used when no agent endpoint is configured
pub struct DisabledAgent;

#[async_trait]
impl Agent for DisabledAgent {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn invoke(&self, _message: &str, _thread_id: &str, _steps: StepSink) -> Result<AgentReply> {
        Err(AppError::Agent("agent not configured".to_string()))
    }

    async fn interrupt(&self) -> Result<()> {
        Ok(())
    }

    async fn clear_session(&self, _thread_id: &str) -> Result<()> {
        Ok(())
    }
}
