//! Wire types for the picking (`/monitor`) and execution (`/flowtracer`)
//! connections.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::resolver::PathEntry;
use crate::InspectorError;

/// Identifier of the anonymous single-use flow wrapping submitted code.
pub const ONE_OFF_FLOW: &str = "one-off-flow";

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitorStart<'a> {
    action: &'static str,
    mode: &'static str,
    application_configuration: ApplicationConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ApplicationConfiguration<'a> {
    identifier: &'a str,
}

impl<'a> MonitorStart<'a> {
    pub fn by_field(target_id: &'a str) -> Self {
        Self {
            action: "monitor-start",
            mode: "byfield",
            application_configuration: ApplicationConfiguration {
                identifier: target_id,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunRequest<'a> {
    authentication: &'a str,
    action: &'static str,
    flow: Flow<'a>,
    inputs: serde_json::Map<String, Value>,
    delay_ms: u64,
    no_tracer_context: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Flow<'a> {
    identifier: &'static str,
    descriptive: Descriptive<'a>,
}

#[derive(Debug, Serialize)]
struct Descriptive<'a> {
    id: &'static str,
    code: &'a str,
    application: &'a str,
}

impl<'a> RunRequest<'a> {
    pub fn one_off(authentication: &'a str, target_id: &'a str, code: &'a str) -> Self {
        Self {
            authentication,
            action: "run",
            flow: Flow {
                identifier: ONE_OFF_FLOW,
                descriptive: Descriptive {
                    id: ONE_OFF_FLOW,
                    code,
                    application: target_id,
                },
            },
            inputs: serde_json::Map::new(),
            delay_ms: 0,
            no_tracer_context: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared inbound pieces
// ---------------------------------------------------------------------------

/// Body of an `{Error, ErrorCode}` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentError {
    pub code: Option<i64>,
    pub message: String,
}

impl AgentError {
    /// Returns `Some` when the frame carries an `Error` or `ErrorCode` key.
    fn from_frame(frame: &Value) -> Option<AgentError> {
        let obj = frame.as_object()?;
        if !obj.contains_key("Error") && !obj.contains_key("ErrorCode") {
            return None;
        }
        let code = obj.get("ErrorCode").and_then(Value::as_i64);
        let message = match obj.get("Error") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(v) if truthy(v) => v.to_string(),
            _ => match obj.get("ErrorCode") {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => "unknown error".to_string(),
            },
        };
        Some(AgentError { code, message })
    }
}

impl From<AgentError> for InspectorError {
    fn from(e: AgentError) -> Self {
        InspectorError::Protocol {
            code: e.code,
            message: e.message,
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Picking connection
// ---------------------------------------------------------------------------

/// A node picked (or hovered) in the remote target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetDescriptor {
    #[serde(default, deserialize_with = "null_as_default")]
    pub actions: Vec<String>,
    #[serde(default)]
    pub automation_id: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub control_type: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Raw selector string as produced by the agent.
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path_info: Vec<PathEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub root_is_orphan: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub screen_placement: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub window_placement: String,
}

/// Reads `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl TargetDescriptor {
    pub fn can_read(&self) -> bool {
        self.actions.iter().any(|a| a.eq_ignore_ascii_case("READ"))
    }

    pub fn can_click(&self) -> bool {
        self.actions.iter().any(|a| a.eq_ignore_ascii_case("CLICK"))
    }

    pub fn screen(&self) -> Result<Placement, InspectorError> {
        self.screen_placement.parse()
    }

    pub fn window(&self) -> Result<Placement, InspectorError> {
        self.window_placement.parse()
    }
}

/// `"x, y, w, h"` rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FromStr for Placement {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| InspectorError::Parse(format!("placement '{s}': {e}")))?;
        match parts.as_slice() {
            [x, y, width, height] => Ok(Placement {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            _ => Err(InspectorError::Parse(format!(
                "placement '{s}' must have four components"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorMessage {
    Selected(Box<TargetDescriptor>),
    Hover(Box<TargetDescriptor>),
    Initialized,
    OffsetSelected(Value),
    Error(AgentError),
    /// A recognised event whose payload did not have the expected shape.
    Malformed { event: String, reason: String },
    Unknown(Value),
}

impl MonitorMessage {
    pub fn classify(frame: &Value) -> MonitorMessage {
        if let Some(err) = AgentError::from_frame(frame) {
            return MonitorMessage::Error(err);
        }
        let event = frame.get("Event").and_then(Value::as_str).unwrap_or_default();
        match event {
            "SELECTED" | "HOVER" => {
                let target = frame.get("Target").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<TargetDescriptor>(target) {
                    Ok(t) if event == "SELECTED" => MonitorMessage::Selected(Box::new(t)),
                    Ok(t) => MonitorMessage::Hover(Box::new(t)),
                    Err(e) => MonitorMessage::Malformed {
                        event: event.to_string(),
                        reason: e.to_string(),
                    },
                }
            }
            "initialized" => MonitorMessage::Initialized,
            "offsetselected" => MonitorMessage::OffsetSelected(frame.clone()),
            _ => MonitorMessage::Unknown(frame.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept,
    Decline,
    Other(String),
}

impl From<&str> for Decision {
    fn from(s: &str) -> Self {
        match s {
            "accept" => Decision::Accept,
            "decline" => Decision::Decline,
            other => Decision::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowMessage {
    Finished {
        decision: Decision,
        reason: Option<String>,
        result: Option<Value>,
    },
    Error(AgentError),
    /// Any other `Action`; not terminal.
    Other(Value),
}

impl FlowMessage {
    pub fn classify(frame: &Value) -> FlowMessage {
        if let Some(err) = AgentError::from_frame(frame) {
            return FlowMessage::Error(err);
        }
        match frame.get("Action").and_then(Value::as_str) {
            Some("finished") => FlowMessage::Finished {
                decision: frame
                    .get("Decision")
                    .and_then(Value::as_str)
                    .map(Decision::from)
                    .unwrap_or(Decision::Accept),
                reason: frame
                    .get("Reason")
                    .and_then(Value::as_str)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                result: frame.get("Result").cloned(),
            },
            _ => FlowMessage::Other(frame.clone()),
        }
    }
}

/// The three shapes a finished `Result` can take.
///
/// The named-bindings shape is recognised only by the absence of `result` and
/// `error` keys, so a flow binding a variable literally named `result` or
/// `error` is read as one of the other two shapes. That ambiguity is inherent
/// to the agent's format and is left as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    Value(Value),
    Error(Value),
    Bindings(Vec<(String, Value)>),
}

impl FlowResult {
    pub fn from_value(result: &Value) -> Result<FlowResult, InspectorError> {
        let obj = result.as_object().ok_or_else(|| {
            InspectorError::Parse(format!("finished result is not an object: {result}"))
        })?;

        if let Some(entry) = obj.get("result") {
            return Ok(FlowResult::Value(entry_value(entry)));
        }
        if let Some(entry) = obj.get("error") {
            return Ok(FlowResult::Error(entry_value(entry)));
        }

        let mut bindings = Vec::with_capacity(obj.len());
        for (name, entry) in obj {
            if !entry.is_object() {
                return Err(InspectorError::Parse(format!(
                    "binding '{name}' is not a {{Value, Order}} entry: {entry}"
                )));
            }
            bindings.push((entry_order(entry), name.clone(), entry_value(entry)));
        }
        // stable: equal orders keep wire order
        bindings.sort_by_key(|(order, _, _)| *order);
        Ok(FlowResult::Bindings(
            bindings.into_iter().map(|(_, n, v)| (n, v)).collect(),
        ))
    }
}

fn entry_value(entry: &Value) -> Value {
    entry
        .get("Value")
        .or_else(|| entry.get("value"))
        .cloned()
        .unwrap_or(Value::Null)
}

fn entry_order(entry: &Value) -> i64 {
    entry
        .get("Order")
        .or_else(|| entry.get("order"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Text form of a result value: strings verbatim, everything else as JSON.
pub fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn monitor_start_matches_wire_format() {
        let v = serde_json::to_value(MonitorStart::by_field("app-1")).unwrap();
        assert_eq!(
            v,
            json!({
                "Action": "monitor-start",
                "Mode": "byfield",
                "ApplicationConfiguration": { "Identifier": "app-1" }
            })
        );
    }

    #[test]
    fn run_request_matches_wire_format() {
        let v = serde_json::to_value(RunRequest::one_off("tok", "app-1", "1+1")).unwrap();
        assert_eq!(
            v,
            json!({
                "Authentication": "tok",
                "Action": "run",
                "Flow": {
                    "Identifier": "one-off-flow",
                    "Descriptive": { "id": "one-off-flow", "code": "1+1", "application": "app-1" }
                },
                "Inputs": {},
                "DelayMs": 0,
                "NoTracerContext": true
            })
        );
    }

    #[test]
    fn error_frames_take_precedence() {
        let msg = MonitorMessage::classify(&json!({"Event": "SELECTED", "Error": "boom", "ErrorCode": 3}));
        assert_eq!(
            msg,
            MonitorMessage::Error(AgentError {
                code: Some(3),
                message: "boom".into()
            })
        );
    }

    #[test]
    fn error_code_alone_becomes_message() {
        let msg = FlowMessage::classify(&json!({"Error": null, "ErrorCode": 42}));
        assert_eq!(
            msg,
            FlowMessage::Error(AgentError {
                code: Some(42),
                message: "42".into()
            })
        );
    }

    #[test]
    fn unknown_events_are_kept_for_logging() {
        let frame = json!({"Event": "SOMETHING_NEW"});
        assert_eq!(MonitorMessage::classify(&frame), MonitorMessage::Unknown(frame));
    }

    #[test]
    fn selected_with_bad_target_is_malformed() {
        let msg = MonitorMessage::classify(&json!({"Event": "SELECTED", "Target": {"Path": 5}}));
        assert!(matches!(msg, MonitorMessage::Malformed { ref event, .. } if event == "SELECTED"));
    }

    #[test]
    fn null_target_fields_read_as_empty() {
        let msg = MonitorMessage::classify(&json!({
            "Event": "SELECTED",
            "Target": {
                "Actions": null,
                "Name": null,
                "Path": "{App}Ok",
                "PathInfo": null,
                "RootIsOrphan": null,
                "ScreenPlacement": null,
                "WindowPlacement": null
            }
        }));
        let MonitorMessage::Selected(target) = msg else {
            panic!("expected a selection, got {msg:?}");
        };
        assert!(target.actions.is_empty());
        assert!(!target.can_read());
        assert_eq!(target.name, None);
        assert_eq!(target.path, "{App}Ok");
        assert!(target.path_info.is_empty());
        assert!(!target.root_is_orphan);
        assert!(target.screen().is_err());
    }

    #[test]
    fn placement_parses_four_numbers() {
        let p: Placement = "10, 20.5, 300, 40".parse().unwrap();
        assert_eq!(
            p,
            Placement {
                x: 10.0,
                y: 20.5,
                width: 300.0,
                height: 40.0
            }
        );
        assert!("1, 2, 3".parse::<Placement>().is_err());
        assert!("a, b, c, d".parse::<Placement>().is_err());
    }

    #[test]
    fn finished_decline_keeps_reason() {
        let msg = FlowMessage::classify(&json!({
            "Action": "finished", "Decision": "decline", "Reason": "not allowed", "Result": null
        }));
        match msg {
            FlowMessage::Finished { decision, reason, .. } => {
                assert_eq!(decision, Decision::Decline);
                assert_eq!(reason.as_deref(), Some("not allowed"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn result_shapes() {
        assert_eq!(
            FlowResult::from_value(&json!({"result": {"Value": "42", "Order": 0}})).unwrap(),
            FlowResult::Value(json!("42"))
        );
        assert_eq!(
            FlowResult::from_value(&json!({
                "error": {"Value": "bad", "Order": 0},
                "retry": {"Value": "false", "Order": 1}
            }))
            .unwrap(),
            FlowResult::Error(json!("bad"))
        );
        assert_eq!(
            FlowResult::from_value(&json!({
                "b": {"Value": 2, "Order": 1},
                "a": {"value": "x", "order": 0}
            }))
            .unwrap(),
            FlowResult::Bindings(vec![("a".into(), json!("x")), ("b".into(), json!(2))])
        );
        assert!(FlowResult::from_value(&json!("nope")).is_err());
        assert!(FlowResult::from_value(&json!({"a": 1})).is_err());
    }
}
