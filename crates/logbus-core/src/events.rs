//! Engine notifications.

use std::fmt;

use crate::entry::LogEntry;

/// Events published by the engine after the corresponding state change.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// `init` completed
    Initialized,
    Started,
    Stopped,
    Paused,
    Resumed,
    /// An entry was routed, to the backlog or through dispatch
    Log(Box<LogEntry>),
    /// A writer type was registered under this name
    WriterAdded(String),
    /// A formatter was registered under this name
    FormatterAdded(String),
}

impl EngineEvent {
    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Initialized => "initialized",
            EngineEvent::Started => "started",
            EngineEvent::Stopped => "stopped",
            EngineEvent::Paused => "paused",
            EngineEvent::Resumed => "resumed",
            EngineEvent::Log(_) => "log",
            EngineEvent::WriterAdded(_) => "writer_added",
            EngineEvent::FormatterAdded(_) => "formatter_added",
        }
    }

    /// The entry carried by a `Log` event.
    pub fn entry(&self) -> Option<&LogEntry> {
        match self {
            EngineEvent::Log(entry) => Some(entry),
            _ => None,
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::Log(entry) => write!(f, "log: {} {}", entry.level, entry.message),
            EngineEvent::WriterAdded(name) | EngineEvent::FormatterAdded(name) => {
                write!(f, "{}: {}", self.kind(), name)
            }
            _ => f.write_str(self.kind()),
        }
    }
}
