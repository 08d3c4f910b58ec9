//! Built-in formatters.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::entry::LogEntry;
use crate::error::LogResult;
use crate::plugin::{LogFormatter, PluginRegistry};
use crate::relay::RelayMessage;

/// Structured record: entry fields plus the host context.
pub fn record(entry: &LogEntry) -> Value {
    entry.to_record()
}

/// `2024-05-01T12:00:00.000Z : #1234 : INFO   : system : message [args]`
pub fn text(entry: &LogEntry) -> Value {
    let mut line = format!(
        "{} : #{} : {:<6} : {} : {}",
        iso_timestamp(entry.timestamp),
        entry.pid(),
        entry.level.name(),
        entry.system,
        entry.message
    );
    if !entry.args.is_empty() {
        line.push(' ');
        line.push_str(&Value::Array(entry.args.clone()).to_string());
    }
    Value::String(line)
}

/// The structured record serialized as one JSON string.
pub fn json_line(entry: &LogEntry) -> Value {
    Value::String(entry.to_record().to_string())
}

/// `timestamp,"LEVEL",pid,"system","message",args...`
pub fn csv(entry: &LogEntry) -> Value {
    let mut fields = vec![
        entry.timestamp.to_string(),
        quote(entry.level.name()),
        entry.pid().to_string(),
        quote(&entry.system),
        quote(&entry.message),
    ];
    fields.extend(entry.args.iter().map(csv_field));
    Value::String(fields.join(","))
}

/// The relay wire message for forwarding to a parent process.
pub fn subprocess(entry: &LogEntry) -> Value {
    serde_json::to_value(RelayMessage::from_entry(entry)).unwrap_or(Value::Null)
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        compound => quote(&compound.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

fn iso_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Register the built-in formatters and their aliases.
pub(crate) fn register_builtins(registry: &mut PluginRegistry) -> LogResult<Vec<String>> {
    let as_record: Arc<dyn LogFormatter> = Arc::new(record);
    let as_text: Arc<dyn LogFormatter> = Arc::new(text);
    let table: [(&str, Arc<dyn LogFormatter>); 8] = [
        ("default", as_record.clone()),
        ("js", as_record.clone()),
        ("jsobject", as_record),
        ("text", as_text.clone()),
        ("plain", as_text),
        ("json", Arc::new(json_line)),
        ("csv", Arc::new(csv)),
        ("subprocess", Arc::new(subprocess)),
    ];
    table
        .into_iter()
        .map(|(name, formatter)| registry.define_shared_formatter(name, formatter))
        .collect()
}
