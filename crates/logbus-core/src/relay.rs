//! Parent/child log relay.
//!
//! A child process started with [`prepare_child`] configures its engine with a
//! `subprocess` writer, which emits one JSON [`RelayMessage`] per line on
//! stdout. The parent captures the child as a [`RelaySource`]; captured
//! messages are queued and replayed into the parent's engine by
//! [`Engine::process_pending`](crate::Engine::process_pending).
//!
//! In-process workers use the same path through [`channel`]: the worker keeps
//! a [`RelayLink`] and the engine captures the matching [`ChannelSource`].

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};

/// Environment variable marking a process as a relayed child.
pub const SUBPROCESS_ENV: &str = "LOGBUS_SUBPROCESS";

/// True when this process was started through [`prepare_child`].
pub fn is_subprocess() -> bool {
    std::env::var(SUBPROCESS_ENV)
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
}

/// Mark `command` as a relayed child and pipe its stdout.
pub fn prepare_child(command: &mut Command) -> &mut Command {
    command.env(SUBPROCESS_ENV, "1").stdout(Stdio::piped())
}

/// Wire form of a relayed log call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum RelayMessage {
    Log { entry: RelayEntry },
}

/// The entry fields carried across the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEntry {
    pub level: String,
    pub system: String,
    pub message: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl RelayMessage {
    pub fn from_entry(entry: &LogEntry) -> Self {
        RelayMessage::Log {
            entry: RelayEntry {
                level: entry.level.name().to_string(),
                system: entry.system.clone(),
                message: entry.message.clone(),
                args: entry.args.clone(),
                timestamp: Some(entry.timestamp),
                pid: Some(entry.pid()),
            },
        }
    }

    /// Parse one line of child output. Blank lines and anything that is not a
    /// relay message yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> LogResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Identity of a captured relay source.
pub type SourceId = u64;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_source_id() -> SourceId {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A message tagged with the source it arrived from.
#[derive(Debug, Clone)]
pub struct RelayEnvelope {
    pub source: SourceId,
    pub message: RelayMessage,
}

/// Where a source delivers its messages while it is bound.
#[derive(Debug, Clone)]
pub struct RelayListener {
    source: SourceId,
    tx: mpsc::Sender<RelayEnvelope>,
}

impl RelayListener {
    pub(crate) fn new(source: SourceId, tx: mpsc::Sender<RelayEnvelope>) -> Self {
        Self { source, tx }
    }

    /// Returns false once the receiving engine is gone.
    pub fn deliver(&self, message: RelayMessage) -> bool {
        self.tx
            .send(RelayEnvelope {
                source: self.source,
                message,
            })
            .is_ok()
    }
}

/// Something that emits relay messages: a child process or a worker.
pub trait RelaySource: Send {
    fn id(&self) -> SourceId;

    /// Bind the listener. Binding again replaces the previous listener.
    fn listen(&mut self, listener: RelayListener) -> LogResult<()>;

    /// Unbind. Messages arriving while unbound are discarded.
    fn unlisten(&mut self);
}

type ListenerSlot = Arc<Mutex<Option<RelayListener>>>;

/// Relay source reading line-delimited messages from a child's stdout.
///
/// The reader thread is spawned on the first `listen` and runs until the
/// stream ends.
pub struct ChildSource {
    id: SourceId,
    pid: Option<u32>,
    reader: Option<Box<dyn Read + Send>>,
    slot: ListenerSlot,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ChildSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSource")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("reading", &self.thread.is_some())
            .finish()
    }
}

impl ChildSource {
    /// Wrap any line-oriented stream of relay messages.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            id: next_source_id(),
            pid: None,
            reader: Some(Box::new(reader)),
            slot: Arc::new(Mutex::new(None)),
            thread: None,
        }
    }

    /// Take the piped stdout of a child started with [`prepare_child`].
    pub fn from_child(child: &mut Child) -> LogResult<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LogError::Relay("child stdout is not piped".to_string()))?;
        let mut source = Self::new(stdout);
        source.pid = Some(child.id());
        Ok(source)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the reader thread has seen the end of the stream.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(false, JoinHandle::is_finished)
    }

    fn spawn_reader(&mut self, reader: Box<dyn Read + Send>) -> LogResult<()> {
        let slot = Arc::clone(&self.slot);
        let id = self.id;
        let handle = std::thread::Builder::new()
            .name(format!("logbus-relay-{}", id))
            .spawn(move || {
                for line in BufReader::new(reader).lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(source = id, error = %e, "Relay stream read failed");
                            break;
                        }
                    };
                    match RelayMessage::parse_line(&line) {
                        Some(message) => {
                            if let Some(listener) = slot.lock().as_ref() {
                                listener.deliver(message);
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => debug!(source = id, %line, "Ignoring non-relay output"),
                    }
                }
                debug!(source = id, "Relay stream closed");
            })?;
        self.thread = Some(handle);
        Ok(())
    }
}

impl RelaySource for ChildSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn listen(&mut self, listener: RelayListener) -> LogResult<()> {
        *self.slot.lock() = Some(listener);
        if let Some(reader) = self.reader.take() {
            self.spawn_reader(reader)?;
        }
        Ok(())
    }

    fn unlisten(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Create an in-process relay: the worker keeps the link, the engine
/// captures the source.
pub fn channel() -> (ChannelSource, RelayLink) {
    let id = next_source_id();
    let slot: ListenerSlot = Arc::new(Mutex::new(None));
    (
        ChannelSource {
            id,
            slot: Arc::clone(&slot),
        },
        RelayLink { source: id, slot },
    )
}

/// Engine side of an in-process relay.
#[derive(Debug)]
pub struct ChannelSource {
    id: SourceId,
    slot: ListenerSlot,
}

impl RelaySource for ChannelSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn listen(&mut self, listener: RelayListener) -> LogResult<()> {
        *self.slot.lock() = Some(listener);
        Ok(())
    }

    fn unlisten(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Worker side of an in-process relay.
#[derive(Debug, Clone)]
pub struct RelayLink {
    source: SourceId,
    slot: ListenerSlot,
}

impl RelayLink {
    pub fn source_id(&self) -> SourceId {
        self.source
    }

    /// Forward a message. Returns false if no engine is listening.
    pub fn send(&self, message: RelayMessage) -> bool {
        match self.slot.lock().as_ref() {
            Some(listener) => listener.deliver(message),
            None => false,
        }
    }
}

struct Captured {
    source: Box<dyn RelaySource>,
    active: bool,
}

/// The engine's registry of captured sources and their shared inbox.
pub(crate) struct SubprocessRelay {
    captured: Vec<Captured>,
    tx: mpsc::Sender<RelayEnvelope>,
    rx: mpsc::Receiver<RelayEnvelope>,
}

impl std::fmt::Debug for SubprocessRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessRelay")
            .field("captured", &self.ids())
            .finish()
    }
}

impl SubprocessRelay {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            captured: Vec::new(),
            tx,
            rx,
        }
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.captured.iter().any(|c| c.source.id() == id)
    }

    pub fn ids(&self) -> Vec<SourceId> {
        self.captured.iter().map(|c| c.source.id()).collect()
    }

    /// Register a source, binding it right away when `active`.
    pub fn capture(&mut self, mut source: Box<dyn RelaySource>, active: bool) -> LogResult<bool> {
        let id = source.id();
        if self.contains(id) {
            return Ok(false);
        }
        if active {
            source.listen(RelayListener::new(id, self.tx.clone()))?;
        }
        self.captured.push(Captured { source, active });
        Ok(true)
    }

    /// Unbind and hand back a source.
    pub fn release(&mut self, id: SourceId) -> Option<Box<dyn RelaySource>> {
        let idx = self.captured.iter().position(|c| c.source.id() == id)?;
        let mut captured = self.captured.remove(idx);
        captured.source.unlisten();
        Some(captured.source)
    }

    /// Rebind every source that is currently unbound.
    pub fn activate_all(&mut self) -> LogResult<()> {
        for captured in self.captured.iter_mut().filter(|c| !c.active) {
            let id = captured.source.id();
            captured.source.listen(RelayListener::new(id, self.tx.clone()))?;
            captured.active = true;
        }
        Ok(())
    }

    /// Unbind every source, keeping them registered.
    pub fn deactivate_all(&mut self) {
        for captured in self.captured.iter_mut().filter(|c| c.active) {
            captured.source.unlisten();
            captured.active = false;
        }
    }

    pub fn try_next(&self) -> Option<RelayEnvelope> {
        self.rx.try_recv().ok()
    }
}
