//! Tracing Layer that feeds `tracing` events into an engine.
//!
//! Events are queued through a [`LogHandle`] and dispatched the next time the
//! engine logs or runs [`Engine::process_pending`](crate::Engine::process_pending).
//! Events whose target starts with `logbus` are skipped, so the engine's own
//! diagnostics never loop back into it.

use std::collections::HashMap;
use std::fmt::Write as FmtWrite;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::entry::sanitize_system;
use crate::handle::{LogHandle, PendingLog};

const SELF_TARGET: &str = "logbus";

/// A tracing Layer that forwards events to a [`LogHandle`].
///
/// Tracing levels map to the lowercase engine level of the same name unless
/// remapped with [`EngineLayer::map_level`]. Events at a level the engine
/// does not know are dropped.
#[derive(Debug, Clone)]
pub struct EngineLayer {
    handle: LogHandle,
    levels: HashMap<tracing::Level, String>,
}

impl EngineLayer {
    pub fn new(handle: LogHandle) -> Self {
        let levels = [
            tracing::Level::ERROR,
            tracing::Level::WARN,
            tracing::Level::INFO,
            tracing::Level::DEBUG,
            tracing::Level::TRACE,
        ]
        .into_iter()
        .map(|level| (level, level.as_str().to_lowercase()))
        .collect();
        Self { handle, levels }
    }

    /// Route a tracing level to a differently named engine level.
    pub fn map_level(mut self, from: tracing::Level, to: impl Into<String>) -> Self {
        self.levels.insert(from, to.into());
        self
    }
}

impl<S> Layer<S> for EngineLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if target.starts_with(SELF_TARGET) {
            return;
        }
        let Some(level) = self.levels.get(metadata.level()) else {
            return;
        };

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);
        let Some(message) = visitor.message.filter(|m| !m.trim().is_empty()) else {
            return;
        };

        let mut fields = visitor.fields;
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                fields.insert("span".to_string(), Value::String(spans.join(" > ")));
            }
        }
        let args = if fields.is_empty() {
            Vec::new()
        } else {
            vec![Value::Object(fields)]
        };

        // Failure only means the engine is gone
        let _ = self.handle.send(PendingLog {
            level: level.clone(),
            system: Some(sanitize_system(&target.replace("::", "."))),
            message,
            args,
            caller: "tracing".to_string(),
            lenient: true,
        });
    }
}

/// Visitor that extracts the message and fields from tracing events.
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: Map::new(),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.fields.insert(field.name().to_string(), Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }
}
