//! Chat turn orchestration
//!
//! All viewers drive the same device and the same conversation, so at most
//! one invocation runs at a time. A turn that arrives while another is in
//! flight queues on the chat lock instead of being rejected.
//!
//! ```text
//! requester task                      worker task
//!   "thinking" -> viewer                lock chat_lock (held until invoke returns)
//!   recv steps  <----- mpsc -----       agent.invoke(.., StepSink)
//!   "agent_step" -> viewer
//!   done / agent_error -> viewer
//! ```
//!
//! Cancellation is cooperative: the requester stops waiting, the agent is
//! asked to interrupt, and the worker is left to finish on its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Agent, AgentReply, StepSink};
use crate::config::AgentConfig;
use crate::protocol::{Outbound, ServerMessage};

/// Steps buffered between the worker and the requester
const STEP_QUEUE: usize = 64;

pub struct AgentBridge {
    agent: Arc<dyn Agent>,
    chat_lock: Arc<Mutex<()>>,
    /// Parent of every turn's token; replaced on each cancel
    cancel: parking_lot::Mutex<CancellationToken>,
    thread_id: String,
    settle_timeout: Duration,
}

impl AgentBridge {
    pub fn new(agent: Arc<dyn Agent>, config: &AgentConfig) -> Self {
        Self {
            agent,
            chat_lock: Arc::new(Mutex::new(())),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            thread_id: config.thread_id.clone(),
            settle_timeout: config.settle_timeout(),
        }
    }

    pub fn agent_name(&self) -> &'static str {
        self.agent.name()
    }

    /// Whether a turn currently holds the agent
    pub fn is_busy(&self) -> bool {
        self.chat_lock.try_lock().is_err()
    }

    /// Run one chat turn, streaming its events to `reply`
    ///
    /// Always ends with either a terminal `agent_response{done:true}` or an
    /// `agent_error`.
    pub async fn chat(&self, message: &str, reply: &mpsc::Sender<Outbound>) {
        if message.trim().is_empty() {
            send(reply, ServerMessage::agent_error("Empty message")).await;
            return;
        }

        let token = self.cancel.lock().child_token();
        send(reply, ServerMessage::thinking()).await;

        let (step_tx, mut step_rx) = mpsc::channel(STEP_QUEUE);
        let mut worker = {
            let lock = self.chat_lock.clone();
            let agent = self.agent.clone();
            let message = message.to_string();
            let thread_id = self.thread_id.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let _turn = lock.lock_owned().await;
                if token.is_cancelled() {
                    debug!("Chat turn cancelled before it started");
                    return Ok(AgentReply::default());
                }
                agent
                    .invoke(&message, &thread_id, StepSink::new(step_tx))
                    .await
            })
        };

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!("Chat cancelled by user");
                    if tokio::time::timeout(self.settle_timeout, &mut worker).await.is_err() {
                        warn!(
                            "Agent did not finish within {:?} after interrupt",
                            self.settle_timeout
                        );
                    }
                    send(reply, ServerMessage::done()).await;
                    return;
                }

                step = step_rx.recv() => match step {
                    Some(step) => {
                        info!("Agent step: {} - {}", step.step_type, preview(&step.content));
                        send(reply, ServerMessage::AgentStep {
                            step_type: step.step_type,
                            content: step.content,
                            metadata: step.metadata,
                        })
                        .await;
                    }
                    // Sink dropped: the worker has returned
                    None => break,
                },
            }
        }

        match worker.await {
            Ok(Ok(result)) => {
                info!("Agent completed ({} chars)", result.content.len());
                send(reply, ServerMessage::done()).await;
            }
            Ok(Err(e)) => {
                warn!("Agent failed: {}", e);
                send(reply, ServerMessage::agent_error(e.to_string())).await;
            }
            Err(e) => {
                warn!("Agent task failed: {}", e);
                send(reply, ServerMessage::agent_error("agent task failed")).await;
            }
        }
    }

    /// Cancel every in-flight or queued turn and interrupt the agent
    pub async fn cancel(&self) {
        let previous = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        previous.cancel();
        if let Err(e) = self.agent.interrupt().await {
            warn!("Failed to interrupt agent: {}", e);
        }
    }

    /// Start a fresh conversation and acknowledge it to `reply`
    pub async fn new_session(&self, reply: &mpsc::Sender<Outbound>) {
        match self.agent.clear_session(&self.thread_id).await {
            Ok(()) => {
                send(
                    reply,
                    ServerMessage::SessionCleared {
                        message: "New conversation started".to_string(),
                    },
                )
                .await
            }
            Err(e) => {
                warn!("Failed to clear agent session: {}", e);
                send(reply, ServerMessage::agent_error(e.to_string())).await;
            }
        }
    }
}

/// Viewer may already be gone; its turn still runs to completion
async fn send(reply: &mpsc::Sender<Outbound>, message: ServerMessage) {
    let _ = reply.send(Outbound::Json(message)).await;
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(100) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStep;
    use crate::error::{AppError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedAgent {
        steps: Vec<AgentStep>,
        delay: Duration,
        fail: bool,
        active: AtomicUsize,
        max_active: AtomicUsize,
        invocations: AtomicUsize,
        interrupts: AtomicUsize,
        clears: AtomicUsize,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn invoke(&self, _message: &str, _thread_id: &str, steps: StepSink) -> Result<AgentReply> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            for step in &self.steps {
                steps.push(step.clone()).await;
            }
            tokio::time::sleep(self.delay).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Agent("rate limited".into()));
            }
            Ok(AgentReply {
                content: "ok".into(),
            })
        }

        async fn interrupt(&self) -> Result<()> {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn clear_session(&self, _thread_id: &str) -> Result<()> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bridge(agent: Arc<ScriptedAgent>, settle_ms: u64) -> Arc<AgentBridge> {
        let config = AgentConfig {
            settle_timeout_ms: settle_ms,
            ..Default::default()
        };
        Arc::new(AgentBridge::new(agent, &config))
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            match item {
                Outbound::Json(msg) => out.push(msg),
                Outbound::Video(_) => panic!("unexpected video frame"),
            }
        }
        out
    }

    #[tokio::test]
    async fn test_steps_forwarded_then_done() {
        let agent = Arc::new(ScriptedAgent {
            steps: vec![
                AgentStep::new("thinking", "reading screen"),
                AgentStep::new("tool_call", "tap"),
            ],
            ..Default::default()
        });
        let bridge = bridge(agent, 100);
        let (tx, mut rx) = mpsc::channel(32);

        bridge.chat("open settings", &tx).await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ServerMessage::thinking());
        assert!(matches!(
            &messages[1],
            ServerMessage::AgentStep { step_type, content, .. }
                if step_type == "thinking" && content == "reading screen"
        ));
        assert!(matches!(
            &messages[2],
            ServerMessage::AgentStep { step_type, .. } if step_type == "tool_call"
        ));
        assert_eq!(messages[3], ServerMessage::done());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let agent = Arc::new(ScriptedAgent::default());
        let bridge = bridge(agent.clone(), 100);
        let (tx, mut rx) = mpsc::channel(32);

        bridge.chat("   \n", &tx).await;

        assert_eq!(drain(&mut rx), vec![ServerMessage::agent_error("Empty message")]);
        assert_eq!(agent.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_agent_failure_reported() {
        let agent = Arc::new(ScriptedAgent {
            fail: true,
            ..Default::default()
        });
        let bridge = bridge(agent, 100);
        let (tx, mut rx) = mpsc::channel(32);

        bridge.chat("hello", &tx).await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[1], ServerMessage::AgentError { error } if error.contains("rate limited")));
    }

    #[tokio::test]
    async fn test_concurrent_chats_are_serialized() {
        let agent = Arc::new(ScriptedAgent {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let bridge = bridge(agent.clone(), 100);

        let mut turns = Vec::new();
        for _ in 0..3 {
            let bridge = bridge.clone();
            turns.push(tokio::spawn(async move {
                let (tx, mut rx) = mpsc::channel(32);
                bridge.chat("go", &tx).await;
                drain(&mut rx)
            }));
        }
        for turn in turns {
            let messages = turn.await.unwrap();
            assert_eq!(messages.last(), Some(&ServerMessage::done()));
        }

        assert_eq!(agent.invocations.load(Ordering::SeqCst), 3);
        assert_eq!(agent.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_ends_turn_within_settle_window() {
        let agent = Arc::new(ScriptedAgent {
            delay: Duration::from_secs(10),
            ..Default::default()
        });
        let bridge = bridge(agent.clone(), 100);
        let (tx, mut rx) = mpsc::channel(32);

        let turn = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.chat("long task", &tx).await })
        };
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Json(ServerMessage::thinking()))
        );

        bridge.cancel().await;
        tokio::time::timeout(Duration::from_secs(1), turn)
            .await
            .expect("turn should end after cancel")
            .unwrap();

        assert_eq!(drain(&mut rx), vec![ServerMessage::done()]);
        assert_eq!(agent.interrupts.load(Ordering::SeqCst), 1);
        // The worker still holds the agent until it really returns
        assert!(bridge.is_busy());
    }

    #[tokio::test]
    async fn test_cancel_skips_queued_turn() {
        let agent = Arc::new(ScriptedAgent {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let bridge = bridge(agent.clone(), 50);

        let (tx1, mut rx1) = mpsc::channel(32);
        let (tx2, mut rx2) = mpsc::channel(32);
        let first = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.chat("first", &tx1).await })
        };
        rx1.recv().await;
        let second = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.chat("second", &tx2).await })
        };
        rx2.recv().await;

        bridge.cancel().await;
        first.await.unwrap();
        second.await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(agent.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(drain(&mut rx1), vec![ServerMessage::done()]);
        assert_eq!(drain(&mut rx2), vec![ServerMessage::done()]);

        // A turn started after the cancel runs normally
        let (tx3, mut rx3) = mpsc::channel(32);
        bridge.chat("third", &tx3).await;
        assert_eq!(drain(&mut rx3).last(), Some(&ServerMessage::done()));
        assert_eq!(agent.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_new_session_acknowledged() {
        let agent = Arc::new(ScriptedAgent::default());
        let bridge = bridge(agent.clone(), 100);
        let (tx, mut rx) = mpsc::channel(32);

        bridge.new_session(&tx).await;

        assert_eq!(agent.clears.load(Ordering::SeqCst), 1);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::SessionCleared { .. }]
        ));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let short = preview(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), 103);
        assert_eq!(preview("short"), "short");
    }
}
