//! Remote code execution over the `/flowtracer` socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{CredentialsProvider, EndpointProvider};
use crate::events::EventBus;
use crate::protocol::{value_text, Decision, FlowMessage, FlowResult, RunRequest};
use crate::settle::{Outcome, Settlement};
use crate::socket::{Connection, Inbound, CLOSE_GRACE};
use crate::InspectorError;

pub const DEFAULT_DECLINE_REASON: &str = "The code was declined";

/// Anything that can execute a code string against a target and hand back
/// the raw result text.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// `timeout_ms == 0` waits indefinitely.
    async fn run(&self, target_id: &str, code: &str, timeout_ms: u64) -> Result<String, InspectorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    Started { session: Uuid, target_id: String },
    /// Every parsed frame received before settlement.
    Message { session: Uuid, frame: Value },
    Settled { session: Uuid, ok: bool, elapsed: Duration },
    /// A terminal frame that arrived after the call was already settled.
    LateSignal { session: Uuid },
}

/// One in-flight call bound to one socket.
struct RpcSession {
    id: Uuid,
    started_at: Instant,
    settlement: Arc<Settlement<String>>,
}

impl RpcSession {
    fn new() -> (Self, tokio::sync::oneshot::Receiver<Outcome<String>>) {
        let (settlement, rx) = Settlement::new();
        let session = Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            settlement: Arc::new(settlement),
        };
        (session, rx)
    }
}

pub struct ScriptRunner {
    endpoint: Arc<dyn EndpointProvider>,
    credentials: Arc<dyn CredentialsProvider>,
    events: EventBus<RunnerEvent>,
}

impl ScriptRunner {
    pub fn new(
        endpoint: impl EndpointProvider + 'static,
        credentials: impl CredentialsProvider + 'static,
    ) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            credentials: Arc::new(credentials),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<RunnerEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    async fn execute(&self, target_id: &str, code: &str, timeout_ms: u64) -> Outcome<String> {
        // one deadline for the handshake and the reply
        let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        let endpoint = self.endpoint.endpoint();
        endpoint.validate()?;
        let url = endpoint.flowtracer_url();
        let credentials = self.credentials.credentials();
        let mut connection = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, Connection::connect(&url))
                .await
                .map_err(|_| timed_out(timeout_ms))??,
            None => Connection::connect(&url).await?,
        };

        let (session, rx) = RpcSession::new();
        self.events.publish(RunnerEvent::Started {
            session: session.id,
            target_id: target_id.to_string(),
        });
        tracing::debug!(session = %session.id, target = %target_id, timeout_ms, "Submitting code");
        connection.send_json(&RunRequest::one_off(credentials.token(), target_id, code))?;

        let watchdog = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                _ = &mut watchdog, if deadline.is_some() => {
                    tracing::debug!(session = %session.id, "Watchdog fired");
                    session.settlement.settle(Err(timed_out(timeout_ms)));
                    break;
                }
                inbound = connection.recv() => match inbound {
                    Some(Inbound::Text(txt)) => {
                        let Some(frame) = parse_frame(&txt) else { continue };
                        self.events.publish(RunnerEvent::Message {
                            session: session.id,
                            frame: frame.clone(),
                        });
                        if let Some(outcome) = interpret(&frame) {
                            session.settlement.settle(outcome);
                            break;
                        }
                    }
                    Some(Inbound::Closed(code)) => {
                        session.settlement.settle(Err(InspectorError::Closed { code }));
                        break;
                    }
                    Some(Inbound::Failed(e)) => {
                        session.settlement.settle(Err(InspectorError::Transport(e)));
                        break;
                    }
                    None => {
                        session.settlement.settle(Err(InspectorError::Transport(
                            "connection reader stopped".into(),
                        )));
                        break;
                    }
                },
            }
        }

        self.drain_in_background(connection, &session);

        let outcome = rx.await.unwrap_or_else(|_| {
            Err(InspectorError::Transport("session ended without a result".into()))
        });
        let elapsed = session.started_at.elapsed();
        self.events.publish(RunnerEvent::Settled {
            session: session.id,
            ok: outcome.is_ok(),
            elapsed,
        });
        match &outcome {
            Ok(_) => tracing::debug!(session = %session.id, ?elapsed, "Code finished"),
            Err(e) => tracing::debug!(session = %session.id, ?elapsed, error = %e, "Code failed"),
        }
        outcome
    }

    /// Closes the socket and keeps reading for [`CLOSE_GRACE`] so that a
    /// terminal frame racing the settlement is observed rather than lost.
    fn drain_in_background(&self, connection: Connection, session: &RpcSession) {
        let settlement = Arc::clone(&session.settlement);
        let events = self.events.clone();
        let id = session.id;
        tokio::spawn(async move {
            connection
                .shutdown(CLOSE_GRACE, |txt| {
                    let Some(outcome) = parse_frame(&txt).and_then(|f| interpret(&f)) else {
                        return;
                    };
                    if !settlement.settle(outcome) {
                        tracing::debug!(
                            session = %id,
                            late = settlement.late_signals(),
                            "Ignoring signal for settled call"
                        );
                        events.publish(RunnerEvent::LateSignal { session: id });
                    }
                })
                .await;
        });
    }
}

#[async_trait]
impl ScriptExecutor for ScriptRunner {
    async fn run(&self, target_id: &str, code: &str, timeout_ms: u64) -> Result<String, InspectorError> {
        self.execute(target_id, code, timeout_ms).await
    }
}

fn timed_out(timeout_ms: u64) -> InspectorError {
    InspectorError::Timeout(format!("Code execution timed out after {timeout_ms}ms"))
}

fn parse_frame(txt: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(txt) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::trace!(error = %e, "Dropping unparseable frame");
            None
        }
    }
}

/// Maps a frame to a terminal outcome, or `None` when it does not end the call.
fn interpret(frame: &Value) -> Option<Outcome<String>> {
    match FlowMessage::classify(frame) {
        FlowMessage::Error(e) => Some(Err(e.into())),
        FlowMessage::Finished {
            decision: Decision::Decline,
            reason,
            ..
        } => Some(Err(InspectorError::Declined(
            reason.unwrap_or_else(|| DEFAULT_DECLINE_REASON.to_string()),
        ))),
        FlowMessage::Finished { result: None, .. } => Some(Err(InspectorError::Parse(
            "finished frame carries no Result".into(),
        ))),
        FlowMessage::Finished {
            result: Some(result),
            ..
        } => Some(finished_result(&result)),
        FlowMessage::Other(frame) => {
            tracing::debug!(action = ?frame.get("Action"), "Non-terminal frame");
            None
        }
    }
}

fn finished_result(result: &Value) -> Outcome<String> {
    match FlowResult::from_value(result)? {
        FlowResult::Value(v) => Ok(value_text(v)),
        FlowResult::Error(v) => Err(InspectorError::Script(value_text(v))),
        FlowResult::Bindings(bindings) => {
            let obj: serde_json::Map<String, Value> = bindings.into_iter().collect();
            Ok(Value::Object(obj).to_string())
        }
    }
}
