//! Event encoding shared by the local sink and the remote pipeline.
//!
//! [`encode`] merges a [`Record`] with the inherited [`Scope`] of the handler
//! that emitted it, producing an immutable [`LogEvent`]. The event's
//! attributes are an insertion-ordered JSON map: inherited attributes first,
//! in the order they were bound, then the record's own attributes. Groups
//! become nested objects keyed by group name.
//!
//! The wire form of an event is a single JSON object:
//!
//! ```json
//! {"timestamp":"2024-05-01T12:00:00.000000000Z","level":"INFO","message":"started","service":"apps"}
//! ```
//!
//! `timestamp`, `level` and `message` always come first. Attributes whose
//! top-level key collides with one of them are skipped so the built-in fields
//! are never overwritten.

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Number, Value as JsonValue};

use crate::{
    error::EncodingError,
    level::Level,
    record::{Attr, Record, Value},
    scope::Scope,
};

const RESERVED_KEYS: [&str; 3] = ["timestamp", "level", "message"];

/// A record merged with its inherited scope, ready for output.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEvent {
    timestamp: Option<DateTime<Utc>>,
    level: Level,
    message: String,
    attributes: Map<String, JsonValue>,
}

impl LogEvent {
    pub fn timestamp(&self) -> Option<&DateTime<Utc>> {
        self.timestamp.as_ref()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Merged attributes in output order.
    pub fn attributes(&self) -> &Map<String, JsonValue> {
        &self.attributes
    }

    /// Serialise the event into its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::TooLarge`] when the payload exceeds `limit`
    /// bytes, or [`EncodingError::Json`] if serialisation fails.
    pub fn to_json(&self, limit: usize) -> Result<String, EncodingError> {
        let payload = serde_json::to_string(self)?;
        if payload.len() > limit {
            return Err(EncodingError::TooLarge {
                size: payload.len(),
                limit,
            });
        }
        Ok(payload)
    }
}

impl Serialize for LogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 2 + usize::from(self.timestamp.is_some()) + self.attributes.len();
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(ts) = &self.timestamp {
            map.serialize_entry("timestamp", &format_timestamp(ts))?;
        }
        map.serialize_entry("level", self.level.as_str())?;
        map.serialize_entry("message", &self.message)?;
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Format a timestamp as RFC 3339 with nanosecond precision in UTC.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Merge `record` with the attributes and groups inherited through `scope`.
pub fn encode(record: Record, scope: &Scope) -> LogEvent {
    let mut attributes = Map::new();
    let groups = scope.groups();
    for bound in scope.bound() {
        insert_at(&mut attributes, &groups[..bound.depth], &bound.attr);
    }
    for attr in &record.attrs {
        insert_at(&mut attributes, groups, attr);
    }
    LogEvent {
        timestamp: record.timestamp,
        level: record.level,
        message: record.message,
        attributes,
    }
}

pub(crate) fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

fn insert_at(root: &mut Map<String, JsonValue>, path: &[String], attr: &Attr) {
    if attr.is_empty() {
        return;
    }
    let Some((first, rest)) = path.split_first() else {
        insert_attr(root, attr, true);
        return;
    };
    if is_reserved(first) {
        debug!(
            "relaylog dropped attribute {:?} under group {first:?}, which shadows a built-in field",
            attr.key
        );
        return;
    }
    let mut target = descend(root, first);
    for name in rest {
        target = descend(target, name);
    }
    insert_attr(target, attr, false);
}

fn insert_attr(map: &mut Map<String, JsonValue>, attr: &Attr, top_level: bool) {
    if attr.is_empty() {
        return;
    }
    match &attr.value {
        // Empty-keyed groups are inlined into the current level.
        Value::Group(members) if attr.key.is_empty() => {
            for member in members {
                insert_attr(map, member, top_level);
            }
        }
        Value::Group(members) => {
            if top_level && is_reserved(&attr.key) {
                return;
            }
            let inner = descend(map, &attr.key);
            for member in members {
                insert_attr(inner, member, false);
            }
        }
        scalar => {
            if top_level && is_reserved(&attr.key) {
                return;
            }
            map.insert(attr.key.clone(), to_json(scalar));
        }
    }
}

/// Return the nested object stored under `name`, creating it if needed.
///
/// A scalar already stored under `name` is replaced by the object.
fn descend<'a>(map: &'a mut Map<String, JsonValue>, name: &str) -> &'a mut Map<String, JsonValue> {
    let slot = map
        .entry(name.to_owned())
        .or_insert_with(|| JsonValue::Object(Map::new()));
    if !slot.is_object() {
        *slot = JsonValue::Object(Map::new());
    }
    match slot {
        JsonValue::Object(inner) => inner,
        _ => unreachable!("slot holds an object after replacement"),
    }
}

fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(v) => JsonValue::Bool(*v),
        Value::Int(v) => JsonValue::Number(Number::from(*v)),
        Value::Uint(v) => JsonValue::Number(Number::from(*v)),
        Value::Float(v) => Number::from_f64(*v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(non_finite_label(*v).to_owned())),
        Value::Str(v) => JsonValue::String(v.clone()),
        Value::Group(members) => {
            let mut inner = Map::new();
            for member in members {
                insert_attr(&mut inner, member, false);
            }
            JsonValue::Object(inner)
        }
    }
}

fn non_finite_label(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "+Inf"
    } else {
        "-Inf"
    }
}
