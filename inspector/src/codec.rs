//! Structure-preserving transport of script results.
//!
//! [`encode`] wraps a function body so that the agent serializes its return
//! value with a tagging replacer: dates, functions and already-visited objects
//! become `{"___type": …}` objects. [`decode`] turns that text back into a
//! [`DecodedValue`] tree.
//!
//! [`tag`] and [`serialize`] perform the same walk host-side over a
//! [`RemoteValue`] graph, producing exactly what the remote wrapper would.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{json, Number, Value};

use crate::InspectorError;

/// Discriminator key of tag objects.
pub const TYPE_KEY: &str = "___type";
pub const ROOT_PATH: &str = "root";

const WRAPPER_HEAD: &str = r#"(function(){
    var seen = [];
    var paths = [];
    return JSON.stringify((function(){
"#;

const WRAPPER_TAIL: &str = r#"
    })(), function (key, val) {
        if (this[key] instanceof Date) {
            return { ___type: "date", value: isNaN(this[key]) ? "NaN" : +this[key] };
        }
        switch (typeof val) {
            case "number":
                return +val;
            case "System.Exception":
                return "<System.Exception " + val + ">";
        }
        if (!(val instanceof Object)) { return val; }
        if (val instanceof Function) {
            return { ___type: "function", value: "" + val, name: val.name };
        }
        var index = seen.indexOf(val);
        if (index !== -1) {
            return { ___type: "cyclic", value: paths[index] };
        }
        seen.push(val);
        var parent = seen.indexOf(this);
        paths.push(parent === -1 ? "root" : paths[parent] + "." + key);
        return val;
    });
})()"#;

/// Wraps `code`, a function body whose `return` value is the result, so the
/// agent hands back tagged JSON text.
pub fn encode(code: &str) -> String {
    let mut wrapped = String::with_capacity(WRAPPER_HEAD.len() + code.len() + WRAPPER_TAIL.len());
    wrapped.push_str(WRAPPER_HEAD);
    wrapped.push_str(code);
    wrapped.push_str(WRAPPER_TAIL);
    wrapped
}

/// Decodes tagged result text. Text that is not JSON comes back unchanged as
/// a [`DecodedValue::String`].
pub fn decode(raw: &str) -> DecodedValue {
    match try_decode(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Result is not JSON; keeping raw text");
            DecodedValue::String(raw.to_string())
        }
    }
}

pub fn try_decode(raw: &str) -> Result<DecodedValue, InspectorError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| InspectorError::Parse(format!("result JSON: {e}")))?;
    Ok(revive(value))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateValue {
    /// Milliseconds since the Unix epoch.
    Valid(f64),
    Invalid,
}

impl DateValue {
    pub fn epoch_ms(&self) -> Option<f64> {
        match self {
            DateValue::Valid(ms) => Some(*ms),
            DateValue::Invalid => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        self.epoch_ms()
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
    }
}

/// A decoded script result. Always a tree.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<DecodedValue>),
    Object(Vec<(String, DecodedValue)>),
    Date(DateValue),
    /// Inert placeholder; the function is never re-created.
    Function { source: String, name: String },
    /// Back-reference to the first occurrence at `path`.
    ///
    /// Emitted for any object reached a second time in the same walk, so two
    /// aliases of one object are reported even when no real cycle exists.
    Cyclic { path: String },
}

impl DecodedValue {
    pub fn get(&self, key: &str) -> Option<&DecodedValue> {
        match self {
            DecodedValue::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&DecodedValue> {
        match self {
            DecodedValue::Array(items) => items.get(i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Tagged JSON form, as the agent would send it.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for DecodedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DecodedValue::Null => serializer.serialize_unit(),
            DecodedValue::Bool(b) => serializer.serialize_bool(*b),
            DecodedValue::Number(n) => n.serialize(serializer),
            DecodedValue::String(s) => serializer.serialize_str(s),
            DecodedValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            DecodedValue::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            DecodedValue::Date(date) => date_tag(date.epoch_ms()).serialize(serializer),
            DecodedValue::Function { source, name } => function_tag(source, name).serialize(serializer),
            DecodedValue::Cyclic { path } => cyclic_tag(path).serialize(serializer),
        }
    }
}

fn revive(value: Value) -> DecodedValue {
    match value {
        Value::Null => DecodedValue::Null,
        Value::Bool(b) => DecodedValue::Bool(b),
        Value::Number(n) => DecodedValue::Number(n),
        Value::String(s) => DecodedValue::String(s),
        Value::Array(items) => DecodedValue::Array(items.into_iter().map(revive).collect()),
        Value::Object(mut obj) => {
            let tag = obj
                .get(TYPE_KEY)
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            match tag.as_deref() {
                Some("date") => DecodedValue::Date(revive_date(obj.get("value"))),
                Some("function") => DecodedValue::Function {
                    source: obj.remove("value").map(text_of).unwrap_or_default(),
                    name: obj.remove("name").map(text_of).unwrap_or_default(),
                },
                Some("cyclic") => DecodedValue::Cyclic {
                    path: obj.remove("value").map(text_of).unwrap_or_default(),
                },
                _ => DecodedValue::Object(obj.into_iter().map(|(k, v)| (k, revive(v))).collect()),
            }
        }
    }
}

fn revive_date(value: Option<&Value>) -> DateValue {
    match value {
        Some(Value::Number(n)) => n.as_f64().map(DateValue::Valid).unwrap_or(DateValue::Invalid),
        Some(Value::String(s)) if s == "NaN" => DateValue::Invalid,
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| DateValue::Valid(dt.timestamp_millis() as f64))
            .unwrap_or(DateValue::Invalid),
        _ => DateValue::Invalid,
    }
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn date_tag(epoch_ms: Option<f64>) -> Value {
    let value = epoch_ms
        .and_then(Number::from_f64)
        .map(|n| {
            // integral milliseconds print without a fraction, as `+date` does
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => json!(f as i64),
                _ => Value::Number(n),
            }
        })
        .unwrap_or_else(|| json!("NaN"));
    json!({ TYPE_KEY: "date", "value": value })
}

fn function_tag(source: &str, name: &str) -> Value {
    json!({ TYPE_KEY: "function", "value": source, "name": name })
}

fn cyclic_tag(path: &str) -> Value {
    json!({ TYPE_KEY: "cyclic", "value": path })
}

// ---------------------------------------------------------------------------
// Host-side tagging over identity graphs
// ---------------------------------------------------------------------------

/// A script-runtime value with reference identity: objects and arrays are
/// shared handles, so graphs (including cycles) can be built.
///
/// Cycles built through `Rc` are never freed; fine for fixtures and fakes.
#[derive(Debug, Clone)]
pub enum RemoteValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Epoch milliseconds; `NaN` for an invalid date.
    Date(f64),
    Function { source: String, name: String },
    Array(Rc<RefCell<Vec<RemoteValue>>>),
    Object(Rc<RefCell<Vec<(String, RemoteValue)>>>),
}

impl RemoteValue {
    pub fn object() -> Self {
        RemoteValue::Object(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn array() -> Self {
        RemoteValue::Array(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn string(s: impl Into<String>) -> Self {
        RemoteValue::String(s.into())
    }

    pub fn function(source: impl Into<String>, name: impl Into<String>) -> Self {
        RemoteValue::Function {
            source: source.into(),
            name: name.into(),
        }
    }

    /// Sets `key` on an object handle; no-op for anything else.
    pub fn set(&self, key: impl Into<String>, value: RemoteValue) -> &Self {
        if let RemoteValue::Object(fields) = self {
            let key = key.into();
            let mut fields = fields.borrow_mut();
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => fields.push((key, value)),
            }
        }
        self
    }

    /// Appends to an array handle; no-op for anything else.
    pub fn push(&self, value: RemoteValue) -> &Self {
        if let RemoteValue::Array(items) = self {
            items.borrow_mut().push(value);
        }
        self
    }
}

/// Produces the tagged JSON the remote wrapper emits for `value`.
pub fn tag(value: &RemoteValue) -> Value {
    Tagger::default().visit(value, None, "")
}

pub fn serialize(value: &RemoteValue) -> String {
    tag(value).to_string()
}

/// Walk state: identity of every object or array already visited, mapped to
/// the path where it was first seen.
#[derive(Default)]
struct Tagger {
    seen: HashMap<*const (), String>,
}

impl Tagger {
    fn first_visit(&mut self, identity: *const (), parent: Option<&str>, key: &str) -> Result<String, Value> {
        if let Some(path) = self.seen.get(&identity) {
            return Err(cyclic_tag(path));
        }
        let path = match parent {
            None => ROOT_PATH.to_string(),
            Some(parent) => format!("{parent}.{key}"),
        };
        self.seen.insert(identity, path.clone());
        Ok(path)
    }

    fn visit(&mut self, value: &RemoteValue, parent: Option<&str>, key: &str) -> Value {
        match value {
            RemoteValue::Null => Value::Null,
            RemoteValue::Bool(b) => Value::Bool(*b),
            RemoteValue::Number(n) => number_value(*n),
            RemoteValue::String(s) => Value::String(s.clone()),
            RemoteValue::Date(ms) => date_tag(if ms.is_nan() { None } else { Some(*ms) }),
            RemoteValue::Function { source, name } => function_tag(source, name),
            RemoteValue::Array(items) => {
                let path = match self.first_visit(Rc::as_ptr(items) as *const (), parent, key) {
                    Ok(path) => path,
                    Err(tag) => return tag,
                };
                let items = items.borrow();
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| self.visit(item, Some(&path), &i.to_string()))
                        .collect(),
                )
            }
            RemoteValue::Object(fields) => {
                let path = match self.first_visit(Rc::as_ptr(fields) as *const (), parent, key) {
                    Ok(path) => path,
                    Err(tag) => return tag,
                };
                let fields = fields.borrow();
                let mut obj = serde_json::Map::with_capacity(fields.len());
                for (k, v) in fields.iter() {
                    let tagged = self.visit(v, Some(&path), k);
                    obj.insert(k.clone(), tagged);
                }
                Value::Object(obj)
            }
        }
    }
}

fn number_value(n: f64) -> Value {
    // JSON has no NaN/Infinity; JSON.stringify writes null
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_wraps_code_in_tagging_replacer() {
        let wrapped = encode("return 1 + 1;");
        assert!(wrapped.starts_with("(function(){"));
        assert!(wrapped.contains("return 1 + 1;"));
        assert!(wrapped.contains("___type: \"cyclic\""));
        assert!(wrapped.trim_end().ends_with("})()"));
    }

    #[test]
    fn dates_survive_the_round_trip() {
        let o = RemoteValue::object();
        o.set("a", RemoteValue::Date(0.0));
        let decoded = decode(&serialize(&o));
        assert_eq!(decoded.get("a"), Some(&DecodedValue::Date(DateValue::Valid(0.0))));
        assert_eq!(
            decoded.get("a").and_then(|d| match d {
                DecodedValue::Date(d) => d.as_datetime(),
                _ => None,
            }),
            DateTime::<Utc>::from_timestamp_millis(0)
        );
    }

    #[test]
    fn invalid_dates_decode_as_invalid() {
        let o = RemoteValue::object();
        o.set("when", RemoteValue::Date(f64::NAN));
        assert_eq!(
            tag(&o),
            json!({ "when": { "___type": "date", "value": "NaN" } })
        );
        assert_eq!(
            decode(&serialize(&o)).get("when"),
            Some(&DecodedValue::Date(DateValue::Invalid))
        );
    }

    #[test]
    fn self_reference_becomes_cyclic_root() {
        let o = RemoteValue::object();
        o.set("self", o.clone());
        let text = serialize(&o);
        assert_eq!(text, r#"{"self":{"___type":"cyclic","value":"root"}}"#);
        assert_eq!(
            decode(&text).get("self"),
            Some(&DecodedValue::Cyclic { path: "root".into() })
        );
    }

    #[test]
    fn nested_paths_are_dotted() {
        let root = RemoteValue::object();
        let a = RemoteValue::object();
        let b = RemoteValue::object();
        b.set("up", a.clone());
        a.set("b", b);
        root.set("a", a);
        assert_eq!(
            tag(&root),
            json!({ "a": { "b": { "up": { "___type": "cyclic", "value": "root.a" } } } })
        );
    }

    #[test]
    fn aliases_are_flagged_but_equal_values_are_not() {
        let shared = RemoteValue::object();
        shared.set("x", RemoteValue::Number(1.0));
        let list = RemoteValue::array();
        list.push(shared.clone()).push(shared);
        assert_eq!(
            tag(&list),
            json!([{ "x": 1 }, { "___type": "cyclic", "value": "root.0" }])
        );

        let twins = RemoteValue::array();
        for _ in 0..2 {
            let o = RemoteValue::object();
            o.set("x", RemoteValue::Number(1.0));
            twins.push(o);
        }
        assert_eq!(tag(&twins), json!([{ "x": 1 }, { "x": 1 }]));
    }

    #[test]
    fn functions_are_inert_placeholders() {
        let o = RemoteValue::object();
        o.set("f", RemoteValue::function("function add(a, b) { return a + b; }", "add"));
        assert_eq!(
            decode(&serialize(&o)).get("f"),
            Some(&DecodedValue::Function {
                source: "function add(a, b) { return a + b; }".into(),
                name: "add".into()
            })
        );
    }

    #[test]
    fn non_json_is_returned_unchanged() {
        assert_eq!(decode("not json"), DecodedValue::String("not json".into()));
        assert!(try_decode("not json").is_err());
    }

    #[test]
    fn plain_type_fields_and_unknown_tags_stay_objects() {
        let decoded = decode(r#"{"type":"date","value":0,"t":{"___type":"mystery","value":1}}"#);
        assert_eq!(decoded.get("type").and_then(DecodedValue::as_str), Some("date"));
        assert_eq!(
            decoded.get("t"),
            Some(&DecodedValue::Object(vec![
                ("___type".into(), DecodedValue::String("mystery".into())),
                ("value".into(), DecodedValue::Number(1.into())),
            ]))
        );
    }

    #[test]
    fn decoded_values_serialize_back_to_tags() {
        let raw = r#"{"d":{"___type":"date","value":1000},"c":{"___type":"cyclic","value":"root"}}"#;
        assert_eq!(decode(raw).to_json().to_string(), raw);
    }

    #[test]
    fn non_finite_numbers_become_null() {
        let list = RemoteValue::array();
        list.push(RemoteValue::Number(f64::INFINITY))
            .push(RemoteValue::Number(1.5));
        assert_eq!(tag(&list), json!([null, 1.5]));
    }
}
