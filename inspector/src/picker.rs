//! One-shot element picking over the `/monitor` socket.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::config::EndpointProvider;
use crate::events::EventBus;
use crate::protocol::{MonitorMessage, MonitorStart, TargetDescriptor};
use crate::settle::Settlement;
use crate::socket::{Connection, Inbound, CLOSE_GRACE};
use crate::InspectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerState {
    Connecting,
    Open,
    Picking,
    Resolved,
    Rejected,
}

impl PickerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PickerState::Resolved | PickerState::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickerEvent {
    State(PickerState),
    Hover(TargetDescriptor),
    Initialized,
    OffsetSelected(Value),
    /// Every parsed frame, before it is interpreted.
    Message(Value),
    /// The agent closed the picking socket.
    Closed(Option<u16>),
}

pub struct ElementPicker {
    endpoint: Arc<dyn EndpointProvider>,
    events: EventBus<PickerEvent>,
}

impl ElementPicker {
    pub fn new(endpoint: impl EndpointProvider + 'static) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<PickerEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PickerEvent> {
        self.events.subscribe()
    }

    fn transition(&self, session: Uuid, state: PickerState) {
        tracing::debug!(session = %session, ?state, "Picker state");
        self.events.publish(PickerEvent::State(state));
    }

    /// Starts picking on `target_id` and waits until the operator selects a
    /// node. Hover and lifecycle notifications go to [`Self::subscribe`].
    pub async fn open(&self, target_id: &str) -> Result<TargetDescriptor, InspectorError> {
        let session = Uuid::new_v4();
        self.transition(session, PickerState::Connecting);

        let endpoint = self.endpoint.endpoint();
        if let Err(e) = endpoint.validate() {
            self.transition(session, PickerState::Rejected);
            return Err(e);
        }
        let url = endpoint.monitor_url();
        let mut connection = match Connection::connect(&url).await {
            Ok(connection) => connection,
            Err(e) => {
                self.transition(session, PickerState::Rejected);
                return Err(e);
            }
        };
        self.transition(session, PickerState::Open);

        if let Err(e) = connection.send_json(&MonitorStart::by_field(target_id)) {
            self.transition(session, PickerState::Rejected);
            return Err(e);
        }
        tracing::info!(session = %session, target = %target_id, "Picking started");
        self.transition(session, PickerState::Picking);

        let (settlement, rx) = Settlement::new();
        while !settlement.is_settled() {
            match connection.recv().await {
                Some(Inbound::Text(txt)) => {
                    if let Some(outcome) = self.handle_frame(session, &txt) {
                        settlement.settle(outcome);
                    }
                }
                Some(Inbound::Closed(code)) => {
                    tracing::debug!(session = %session, ?code, "Agent closed picking socket");
                    self.events.publish(PickerEvent::Closed(code));
                    settlement.settle(Err(InspectorError::Closed { code }));
                }
                Some(Inbound::Failed(e)) => {
                    settlement.settle(Err(InspectorError::Transport(e)));
                }
                None => {
                    settlement.settle(Err(InspectorError::Transport(
                        "connection reader stopped".into(),
                    )));
                }
            }
        }

        tokio::spawn(async move {
            connection
                .shutdown(CLOSE_GRACE, |txt| {
                    tracing::trace!(session = %session, len = txt.len(), "Ignoring frame after selection");
                })
                .await;
        });

        let outcome = rx.await.unwrap_or_else(|_| {
            Err(InspectorError::Transport("picking ended without a result".into()))
        });
        match &outcome {
            Ok(target) => {
                tracing::info!(session = %session, path = %target.path, "Element selected");
                self.transition(session, PickerState::Resolved);
            }
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Picking failed");
                self.transition(session, PickerState::Rejected);
            }
        }
        outcome
    }

    /// Publishes notifications for one frame and returns the terminal outcome
    /// it carries, if any.
    fn handle_frame(
        &self,
        session: Uuid,
        txt: &str,
    ) -> Option<Result<TargetDescriptor, InspectorError>> {
        let frame: Value = match serde_json::from_str(txt) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!(session = %session, error = %e, "Dropping unparseable frame");
                return None;
            }
        };
        self.events.publish(PickerEvent::Message(frame.clone()));

        match MonitorMessage::classify(&frame) {
            MonitorMessage::Selected(target) => Some(Ok(*target)),
            MonitorMessage::Error(e) => Some(Err(e.into())),
            MonitorMessage::Malformed { event, reason } if event == "SELECTED" => Some(Err(
                InspectorError::Parse(format!("selected target: {reason}")),
            )),
            MonitorMessage::Malformed { event, reason } => {
                tracing::warn!(session = %session, %event, %reason, "Malformed event payload");
                None
            }
            MonitorMessage::Hover(target) => {
                self.events.publish(PickerEvent::Hover(*target));
                None
            }
            MonitorMessage::Initialized => {
                self.events.publish(PickerEvent::Initialized);
                None
            }
            MonitorMessage::OffsetSelected(frame) => {
                self.events.publish(PickerEvent::OffsetSelected(frame));
                None
            }
            MonitorMessage::Unknown(frame) => {
                tracing::warn!(session = %session, event = ?frame.get("Event"), "Unknown picking event");
                None
            }
        }
    }
}
