//! Writer and formatter plugin contracts.
//!
//! Formatters render a [`LogEntry`] into an opaque [`Value`]. Writers receive
//! that rendering together with the entry. Both are registered by
//! case-insensitive name before the engine starts; a writer is registered as a
//! factory and instantiated once per configured [`WriterSpec`](crate::WriterSpec)
//! on every `start()`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::entry::{HostContext, LogEntry};
use crate::error::{LogError, LogResult};
use crate::handle::LogHandle;
use crate::level::Level;

/// Renders an entry for a sink or for history.
pub trait LogFormatter: Send + Sync {
    fn format(&self, entry: &LogEntry) -> Value;
}

impl<F> LogFormatter for F
where
    F: Fn(&LogEntry) -> Value + Send + Sync,
{
    fn format(&self, entry: &LogEntry) -> Value {
        self(entry)
    }
}

/// An output sink.
///
/// `write` receives the output of the writer's own formatter plus the entry
/// it was rendered from. Errors propagate to the caller of `log()` and abort
/// the rest of that dispatch pass.
pub trait LogWriter: Send {
    fn write(&mut self, message: &Value, entry: &LogEntry) -> LogResult<()>;

    fn flush(&mut self) -> LogResult<()> {
        Ok(())
    }

    fn close(&mut self) -> LogResult<()> {
        Ok(())
    }
}

/// Everything a writer factory gets to build one writer instance.
#[derive(Debug, Clone)]
pub struct WriterContext {
    /// Configured writer name, sanitized to `[A-Za-z0-9_]`
    pub name: String,
    /// Raw level filter from the writer configuration
    pub levels: String,
    /// Formatter name the instance is bound to
    pub formatter: String,
    pub options: Map<String, Value>,
    /// Queue for logging back into the engine from inside the writer
    pub handle: LogHandle,
    pub host: Arc<HostContext>,
}

impl WriterContext {
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Builds writer instances for one registered writer type.
pub type WriterFactory =
    Arc<dyn Fn(&WriterContext) -> LogResult<Box<dyn LogWriter>> + Send + Sync>;

/// Named writer factories and formatter instances.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    writers: HashMap<String, WriterFactory>,
    formatters: HashMap<String, Arc<dyn LogFormatter>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("writers", &self.writer_names())
            .field("formatters", &self.formatter_names())
            .finish()
    }
}

fn normalize_name(kind: &str, name: &str) -> LogResult<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(LogError::config(format!("Missing {} name", kind)));
    }
    Ok(name)
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a writer factory. Returns the normalized name.
    ///
    /// # Errors
    ///
    /// `LogError::Configuration` for an empty name, `LogError::AlreadyDefined`
    /// if the name is taken. Nothing is registered on failure.
    pub fn define_writer<F>(&mut self, name: &str, factory: F) -> LogResult<String>
    where
        F: Fn(&WriterContext) -> LogResult<Box<dyn LogWriter>> + Send + Sync + 'static,
    {
        let name = normalize_name("writer", name)?;
        if self.writers.contains_key(&name) {
            return Err(LogError::AlreadyDefined {
                kind: "Writer",
                name,
            });
        }
        self.writers.insert(name.clone(), Arc::new(factory));
        Ok(name)
    }

    /// Register a formatter instance. Returns the normalized name.
    pub fn define_formatter<F>(&mut self, name: &str, formatter: F) -> LogResult<String>
    where
        F: LogFormatter + 'static,
    {
        self.define_shared_formatter(name, Arc::new(formatter))
    }

    /// Register an already shared formatter, e.g. under several aliases.
    pub fn define_shared_formatter(
        &mut self,
        name: &str,
        formatter: Arc<dyn LogFormatter>,
    ) -> LogResult<String> {
        let name = normalize_name("formatter", name)?;
        if self.formatters.contains_key(&name) {
            return Err(LogError::AlreadyDefined {
                kind: "Formatter",
                name,
            });
        }
        self.formatters.insert(name.clone(), formatter);
        Ok(name)
    }

    pub fn writer(&self, name: &str) -> Option<WriterFactory> {
        self.writers.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn formatter(&self, name: &str) -> Option<Arc<dyn LogFormatter>> {
        self.formatters.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn writer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.writers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn formatter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.formatters.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Which levels a writer accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelFilter {
    All,
    Only(Vec<String>),
}

impl LevelFilter {
    /// Parse `*` or a comma-separated list of level names.
    pub fn parse(spec: &str) -> Self {
        let names: Vec<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_uppercase)
            .collect();
        if names.is_empty() || names.iter().any(|n| n == "*") {
            LevelFilter::All
        } else {
            LevelFilter::Only(names)
        }
    }

    pub fn takes(&self, level: &Level) -> bool {
        match self {
            LevelFilter::All => true,
            LevelFilter::Only(names) => names.iter().any(|n| n == level.name()),
        }
    }
}

/// A running writer bound to its filter and formatter.
pub struct WriterInstance {
    name: String,
    filter: LevelFilter,
    formatter: Arc<dyn LogFormatter>,
    writer: Box<dyn LogWriter>,
}

impl fmt::Debug for WriterInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterInstance")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .finish()
    }
}

impl WriterInstance {
    pub fn new(
        name: impl Into<String>,
        filter: LevelFilter,
        formatter: Arc<dyn LogFormatter>,
        writer: Box<dyn LogWriter>,
    ) -> Self {
        Self {
            name: name.into(),
            filter,
            formatter,
            writer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn takes_level(&self, level: &Level) -> bool {
        self.filter.takes(level)
    }

    /// Format with this writer's formatter and hand the result to the sink.
    pub fn dispatch(&mut self, entry: &LogEntry) -> LogResult<()> {
        let message = self.formatter.format(entry);
        self.writer.write(&message, entry)
    }

    pub fn flush(&mut self) -> LogResult<()> {
        self.writer.flush()
    }

    pub fn close(&mut self) -> LogResult<()> {
        self.writer.close()
    }
}
