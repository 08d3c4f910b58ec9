use std::io::Write;

use serde_json::Value;

use crate::entry::LogEntry;
use crate::error::LogResult;
use crate::plugin::{LogWriter, WriterContext};
use crate::relay::{RelayLink, RelayMessage};

#[derive(Debug)]
enum Target {
    Stdout,
    Link(RelayLink),
}

/// Forwards entries to a parent engine.
///
/// By default each entry becomes one [`RelayMessage`] line on stdout, which
/// the parent reads through a [`ChildSource`](crate::relay::ChildSource).
/// Built with [`SubprocessWriter::linked`] it forwards in-process instead.
#[derive(Debug)]
pub struct SubprocessWriter {
    target: Target,
}

impl SubprocessWriter {
    pub fn stdout() -> Self {
        Self {
            target: Target::Stdout,
        }
    }

    pub fn linked(link: RelayLink) -> Self {
        Self {
            target: Target::Link(link),
        }
    }

    pub fn from_context(_ctx: &WriterContext) -> LogResult<Box<dyn LogWriter>> {
        Ok(Box::new(Self::stdout()))
    }
}

impl LogWriter for SubprocessWriter {
    fn write(&mut self, _message: &Value, entry: &LogEntry) -> LogResult<()> {
        let message = RelayMessage::from_entry(entry);
        match &self.target {
            Target::Stdout => {
                let mut line = message.to_line()?;
                line.push('\n');
                let mut out = std::io::stdout().lock();
                out.write_all(line.as_bytes())?;
                out.flush()?;
            }
            Target::Link(link) => {
                link.send(message);
            }
        }
        Ok(())
    }
}
