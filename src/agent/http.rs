//! HTTP client for a remote agent service
//!
//! ```text
//! POST /invoke               {"message","thread_id"}
//!   <- NDJSON, one event per line:
//!      {"type":"step","step_type","content","metadata"}   zero or more
//!      {"type":"result","content"} | {"type":"error","error"}
//! POST /interrupt
//! POST /sessions/{thread_id}/clear
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Agent, AgentReply, AgentStep, StepSink};
use crate::error::{AppError, Result};

/// Interrupt and clear are quick control calls
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct InvokeRequest<'a> {
    message: &'a str,
    thread_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InvokeEvent {
    Step(AgentStep),
    Result {
        #[serde(default)]
        content: String,
    },
    Error {
        error: String,
    },
}

pub struct HttpAgent {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgent {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build agent client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_control(&self, path: &str) -> Result<()> {
        self.client
            .post(self.url(path))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Agent for HttpAgent {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn invoke(&self, message: &str, thread_id: &str, steps: StepSink) -> Result<AgentReply> {
        let response = self
            .client
            .post(self.url("/invoke"))
            .json(&InvokeRequest { message, thread_id })
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut buf = BytesMut::new();
        loop {
            let ended = match stream.next().await {
                Some(chunk) => {
                    buf.extend_from_slice(&chunk?);
                    false
                }
                None => {
                    if !buf.is_empty() && !buf.ends_with(b"\n") {
                        buf.extend_from_slice(b"\n");
                    }
                    true
                }
            };

            while let Some(line) = next_line(&mut buf) {
                let Some(event) = parse_line(&line)? else {
                    continue;
                };
                match event {
                    InvokeEvent::Step(step) => {
                        if !steps.push(step).await {
                            debug!("Step receiver gone, discarding step");
                        }
                    }
                    InvokeEvent::Result { content } => return Ok(AgentReply { content }),
                    InvokeEvent::Error { error } => return Err(AppError::Agent(error)),
                }
            }

            if ended {
                return Err(AppError::Agent(
                    "agent stream ended without a result".to_string(),
                ));
            }
        }
    }

    async fn interrupt(&self) -> Result<()> {
        info!("Interrupting agent");
        self.post_control("/interrupt").await
    }

    async fn clear_session(&self, thread_id: &str) -> Result<()> {
        info!("Clearing agent session {}", thread_id);
        self.post_control(&format!("/sessions/{}/clear", thread_id))
            .await
    }
}

/// Split one `\n`-terminated line off the front of `buf`
fn next_line(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = buf.iter().position(|b| *b == b'\n')?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    Some(line.freeze())
}

/// Blank lines are keep-alives
fn parse_line(line: &[u8]) -> Result<Option<InvokeEvent>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| AppError::Agent(format!("agent sent invalid UTF-8: {}", e)))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| AppError::Agent(format!("malformed agent event: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn test_next_line() {
        let mut buf = BytesMut::from(&b"one\ntwo\npart"[..]);
        assert_eq!(next_line(&mut buf).unwrap(), Bytes::from_static(b"one"));
        assert_eq!(next_line(&mut buf).unwrap(), Bytes::from_static(b"two"));
        assert!(next_line(&mut buf).is_none());
        assert_eq!(&buf[..], b"part");
    }

    #[test]
    fn test_parse_line() {
        assert!(parse_line(b"  \r").unwrap().is_none());
        match parse_line(br#"{"type":"step","step_type":"tool_call","content":"tap"}"#).unwrap() {
            Some(InvokeEvent::Step(step)) => {
                assert_eq!(step.step_type, "tool_call");
                assert_eq!(step.metadata, serde_json::json!({}));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse_line(br#"{"type":"error","error":"boom"}"#).unwrap(),
            Some(InvokeEvent::Error { .. })
        ));
        assert!(parse_line(b"{not json").is_err());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_invoke_streams_steps() {
        let body = concat!(
            r#"{"type":"step","step_type":"thinking","content":"looking"}"#,
            "\n\n",
            r#"{"type":"step","step_type":"tool_call","content":"tap","metadata":{"x":1}}"#,
            "\n",
            r#"{"type":"result","content":"opened settings"}"#,
        );
        let base = serve(Router::new().route("/invoke", post(move || async move { body }))).await;
        let agent = HttpAgent::new(&base, Duration::from_secs(5)).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let reply = agent
            .invoke("open settings", "t1", StepSink::new(tx))
            .await
            .unwrap();
        assert_eq!(reply.content, "opened settings");

        assert_eq!(rx.recv().await.unwrap().content, "looking");
        let step = rx.recv().await.unwrap();
        assert_eq!(step.step_type, "tool_call");
        assert_eq!(step.metadata, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_invoke_error_event() {
        let body = "{\"type\":\"error\",\"error\":\"model overloaded\"}\n";
        let base = serve(Router::new().route("/invoke", post(move || async move { body }))).await;
        let agent = HttpAgent::new(&base, Duration::from_secs(5)).unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let err = agent.invoke("hi", "t1", StepSink::new(tx)).await.unwrap_err();
        assert!(matches!(err, AppError::Agent(ref m) if m == "model overloaded"));
    }

    #[tokio::test]
    async fn test_invoke_truncated_stream() {
        let body = "{\"type\":\"step\",\"step_type\":\"thinking\"}\n";
        let base = serve(Router::new().route("/invoke", post(move || async move { body }))).await;
        let agent = HttpAgent::new(&base, Duration::from_secs(5)).unwrap();

        let (tx, _rx) = mpsc::channel(8);
        assert!(agent.invoke("hi", "t1", StepSink::new(tx)).await.is_err());
    }

    #[tokio::test]
    async fn test_control_calls() {
        let hits: Arc<Mutex<Vec<String>>> = Arc::default();
        let router = Router::new()
            .route(
                "/interrupt",
                post(|State(hits): State<Arc<Mutex<Vec<String>>>>| async move {
                    hits.lock().push("interrupt".into());
                }),
            )
            .route(
                "/sessions/:id/clear",
                post(
                    |State(hits): State<Arc<Mutex<Vec<String>>>>,
                     axum::extract::Path(id): axum::extract::Path<String>| async move {
                        hits.lock().push(format!("clear {}", id));
                    },
                ),
            )
            .with_state(hits.clone());
        let base = serve(router).await;
        let agent = HttpAgent::new(&format!("{}/", base), Duration::from_secs(5)).unwrap();

        agent.interrupt().await.unwrap();
        agent.clear_session("ios-session").await.unwrap();
        assert_eq!(*hits.lock(), vec!["interrupt", "clear ios-session"]);
    }
}
