//! Built-in writers.

mod console;
mod file;
mod subprocess;
pub mod template;

pub use console::{ConsoleStream, ConsoleWriter, NullWriter};
pub use file::{Clock, FileWriter, DEFAULT_FILENAME, DEFAULT_HOUSEKEEPING_MS};
pub use subprocess::SubprocessWriter;

use serde_json::Value;

use crate::error::LogResult;
use crate::plugin::{LogWriter, PluginRegistry, WriterContext};

/// Render formatter output as text lines.
///
/// Strings are written as-is, arrays one item per line, anything else as
/// JSON. The result always ends with a newline.
pub fn render_lines(message: &Value) -> String {
    let mut text = match message {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Register the built-in writer types and their aliases.
pub(crate) fn register_builtins(registry: &mut PluginRegistry) -> LogResult<Vec<String>> {
    let mut names = Vec::new();
    for alias in ["null", "nullwriter"] {
        names.push(registry.define_writer(alias, |_ctx: &WriterContext| {
            Ok(Box::new(NullWriter) as Box<dyn LogWriter>)
        })?);
    }
    for alias in ["console", "consolewriter", "stdout", "default"] {
        names.push(registry.define_writer(alias, ConsoleWriter::from_context)?);
    }
    for alias in ["file", "filewriter"] {
        names.push(registry.define_writer(alias, FileWriter::from_context)?);
    }
    names.push(registry.define_writer("subprocess", SubprocessWriter::from_context)?);
    Ok(names)
}
