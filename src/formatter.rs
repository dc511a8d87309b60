//! Formatters rendering a [`LogEvent`] for the local sink.

use serde_json::{Map, Value as JsonValue};

use crate::encoder::{LogEvent, format_timestamp};

/// Trait for turning encoded events into a single output line.
///
/// Implementors must be thread-safe (`Send + Sync`) because a sink is shared
/// by every handler derived from the same root.
pub trait EventFormatter: Send + Sync {
    /// Format an event without a trailing newline.
    fn format(&self, event: &LogEvent) -> String;
}

/// Human-readable `key=value` lines.
///
/// ```text
/// 2024-05-01T12:00:00.000000000Z INFO started service=apps req.id=7
/// ```
///
/// Nested groups are flattened into dotted keys. String values containing
/// whitespace, `=` or quotes are rendered as JSON strings.
#[derive(Copy, Clone, Debug, Default)]
pub struct TextFormatter;

impl EventFormatter for TextFormatter {
    fn format(&self, event: &LogEvent) -> String {
        let mut line = String::new();
        if let Some(ts) = event.timestamp() {
            line.push_str(&format_timestamp(ts));
            line.push(' ');
        }
        line.push_str(event.level().as_str());
        line.push(' ');
        line.push_str(event.message());
        push_pairs(&mut line, "", event.attributes());
        line
    }
}

fn push_pairs(line: &mut String, prefix: &str, map: &Map<String, JsonValue>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            JsonValue::Object(inner) => push_pairs(line, &path, inner),
            JsonValue::String(s) => {
                line.push(' ');
                line.push_str(&path);
                line.push('=');
                if needs_quotes(s) {
                    line.push_str(&value.to_string());
                } else {
                    line.push_str(s);
                }
            }
            other => {
                line.push(' ');
                line.push_str(&path);
                line.push('=');
                line.push_str(&other.to_string());
            }
        }
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '=' || c == '"')
}

/// One JSON object per line, identical to the remote wire payload.
#[derive(Copy, Clone, Debug, Default)]
pub struct JsonFormatter;

impl EventFormatter for JsonFormatter {
    fn format(&self, event: &LogEvent) -> String {
        serde_json::to_string(event).unwrap_or_else(|err| {
            format!(
                "{{\"level\":\"{}\",\"message\":\"unserialisable event: {err}\"}}",
                event.level()
            )
        })
    }
}
