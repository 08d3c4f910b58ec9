//! Deferred logging through a cloneable handle.
//!
//! Writers, event consumers and other threads cannot borrow the engine while
//! it is dispatching. They log through a [`LogHandle`] instead: the call is
//! queued and the engine replays it once the active dispatch has returned.

use std::sync::mpsc;

use serde_json::Value;

/// A queued log call.
#[derive(Debug, Clone)]
pub(crate) struct PendingLog {
    pub level: String,
    pub system: Option<String>,
    pub message: String,
    pub args: Vec<Value>,
    /// Source tag of the code that queued the call
    pub caller: String,
    /// Drop the call instead of failing when the level is unknown
    pub lenient: bool,
}

/// Cloneable, thread-safe entry point into an engine's log queue.
#[derive(Debug, Clone)]
pub struct LogHandle {
    tx: mpsc::Sender<PendingLog>,
}

impl LogHandle {
    pub(crate) fn new(tx: mpsc::Sender<PendingLog>) -> Self {
        Self { tx }
    }

    /// Queue a log call. Returns false if the engine has been dropped.
    #[track_caller]
    pub fn log(&self, level: &str, message: impl Into<String>) -> bool {
        let caller = crate::entry::caller_system(std::panic::Location::caller());
        self.send(PendingLog {
            level: level.to_string(),
            system: None,
            message: message.into(),
            args: Vec::new(),
            caller,
            lenient: false,
        })
    }

    /// Queue a log call with an explicit source tag and arguments.
    #[track_caller]
    pub fn log_with(
        &self,
        level: &str,
        system: Option<&str>,
        message: impl Into<String>,
        args: Vec<Value>,
    ) -> bool {
        let caller = crate::entry::caller_system(std::panic::Location::caller());
        self.send(PendingLog {
            level: level.to_string(),
            system: system.map(str::to_string),
            message: message.into(),
            args,
            caller,
            lenient: false,
        })
    }

    pub(crate) fn send(&self, pending: PendingLog) -> bool {
        self.tx.send(pending).is_ok()
    }
}
