use std::io::Write;

use serde_json::Value;

use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use crate::plugin::{LogWriter, WriterContext};

use super::render_lines;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWriter;

impl LogWriter for NullWriter {
    fn write(&mut self, _message: &Value, _entry: &LogEntry) -> LogResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleStream {
    #[default]
    Stdout,
    Stderr,
}

/// Writes each rendered entry as a line on stdout (or stderr).
#[derive(Debug, Default)]
pub struct ConsoleWriter {
    stream: ConsoleStream,
}

impl ConsoleWriter {
    pub fn new(stream: ConsoleStream) -> Self {
        Self { stream }
    }

    /// Options: `stream` = `"stdout"` (default) or `"stderr"`.
    pub fn from_context(ctx: &WriterContext) -> LogResult<Box<dyn LogWriter>> {
        let stream = match ctx.option_str("stream").map(str::to_ascii_lowercase) {
            None => ConsoleStream::Stdout,
            Some(s) if s == "stdout" => ConsoleStream::Stdout,
            Some(s) if s == "stderr" => ConsoleStream::Stderr,
            Some(other) => {
                return Err(LogError::config(format!(
                    "Writer '{}': unknown console stream '{}'",
                    ctx.name, other
                )))
            }
        };
        Ok(Box::new(Self::new(stream)))
    }

    pub fn stream(&self) -> ConsoleStream {
        self.stream
    }
}

impl LogWriter for ConsoleWriter {
    fn write(&mut self, message: &Value, _entry: &LogEntry) -> LogResult<()> {
        let text = render_lines(message);
        match self.stream {
            ConsoleStream::Stdout => std::io::stdout().lock().write_all(text.as_bytes())?,
            ConsoleStream::Stderr => std::io::stderr().lock().write_all(text.as_bytes())?,
        }
        Ok(())
    }

    fn flush(&mut self) -> LogResult<()> {
        match self.stream {
            ConsoleStream::Stdout => std::io::stdout().flush()?,
            ConsoleStream::Stderr => std::io::stderr().flush()?,
        }
        Ok(())
    }
}
