//! Main Engine - the log bus every entry passes through
//!
//! The engine owns the level set, the plugin registry, the running writer
//! instances, the backlog and the history. It moves through
//! `Unconfigured -> Configured -> Running <-> Paused` and back to
//! `Configured` on `stop()`.
//!
//! # Example
//!
//! ```ignore
//! use logbus_core::{Engine, EngineConfig, WriterSpec};
//!
//! let mut engine = Engine::new();
//! engine.init(
//!     EngineConfig::default()
//!         .with_levels("info,error")
//!         .with_writer(WriterSpec::new("disk", "file").option("filename", "logs/app.{YYYYMMDD}.log")),
//! )?;
//! engine.start()?;
//! engine.log("info", Some("startup"), "ready", vec![])?;
//! engine.shortcut("error").unwrap().log("something broke")?;
//! ```

use std::fmt;
use std::panic::Location;
use std::sync::{mpsc, Arc};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::buffer::{Backlog, History};
use crate::config::{EngineConfig, WriterSpec};
use crate::entry::{caller_system, sanitize_system, HostContext, LogEntry, Message};
use crate::error::{LogError, LogResult};
use crate::events::EngineEvent;
use crate::formatters;
use crate::handle::{LogHandle, PendingLog};
use crate::level::{Level, LevelRegistry};
use crate::plugin::{
    LevelFilter, LogFormatter, LogWriter, PluginRegistry, WriterContext, WriterInstance,
};
use crate::relay::{
    self, RelayEntry, RelayEnvelope, RelayMessage, RelaySource, SourceId, SubprocessRelay,
};
use crate::writers;

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Source tag of the engine's own notices
const NOTICE_SYSTEM: &str = "logbus";

/// Fallback source tag for relayed entries without one
const RELAY_SYSTEM: &str = "subprocess";

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unconfigured,
    Configured,
    Running,
    Paused,
}

/// A level argument: a name to resolve, or a [`Level`] value.
#[derive(Debug, Clone)]
pub enum LevelRef<'a> {
    Name(&'a str),
    Level(Level),
}

impl<'a> From<&'a str> for LevelRef<'a> {
    fn from(name: &'a str) -> Self {
        LevelRef::Name(name)
    }
}

impl<'a> From<&'a String> for LevelRef<'a> {
    fn from(name: &'a String) -> Self {
        LevelRef::Name(name)
    }
}

impl From<Level> for LevelRef<'_> {
    fn from(level: Level) -> Self {
        LevelRef::Level(level)
    }
}

impl From<&Level> for LevelRef<'_> {
    fn from(level: &Level) -> Self {
        LevelRef::Level(level.clone())
    }
}

/// The log bus.
pub struct Engine {
    state: EngineState,
    config: Option<EngineConfig>,
    levels: LevelRegistry,
    plugins: PluginRegistry,
    /// Active writer instances, in configured order
    writers: Vec<WriterInstance>,
    history: History,
    history_enabled: bool,
    history_formatter: Option<Arc<dyn LogFormatter>>,
    /// Open while stopped or paused; `None` while dispatching
    backlog: Option<Backlog>,
    backlog_limit: usize,
    /// Level for self-notices; `None` when notices are off
    notice_level: Option<Level>,
    relay: SubprocessRelay,
    context: Arc<HostContext>,
    event_tx: broadcast::Sender<EngineEvent>,
    pending_tx: mpsc::Sender<PendingLog>,
    pending_rx: mpsc::Receiver<PendingLog>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("levels", &self.levels.names())
            .field("writers", &self.writers)
            .field("history", &self.history.len())
            .field("backlog", &self.backlog.as_ref().map(Backlog::len))
            .field("relay", &self.relay)
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine with the built-in writers and formatters registered.
    pub fn new() -> Self {
        let mut engine = Self::empty();
        let registered = writers::register_builtins(&mut engine.plugins)
            .and_then(|_| formatters::register_builtins(&mut engine.plugins));
        if let Err(e) = registered {
            warn!(error = %e, "Failed to register built-in plugins");
        }
        engine
    }

    /// Create an engine with an empty plugin registry.
    pub fn empty() -> Self {
        let defaults = EngineConfig::default();
        let mut levels = LevelRegistry::new();
        if let Err(e) = levels.configure(&defaults.levels) {
            warn!(error = %e, "Default levels rejected");
        }
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (pending_tx, pending_rx) = mpsc::channel();

        Self {
            state: EngineState::Unconfigured,
            config: None,
            levels,
            plugins: PluginRegistry::new(),
            writers: Vec::new(),
            history: History::new(defaults.history_size_limit),
            history_enabled: defaults.history,
            history_formatter: None,
            backlog: Some(Backlog::new(defaults.backlog_size_limit)),
            backlog_limit: defaults.backlog_size_limit,
            notice_level: None,
            relay: SubprocessRelay::new(),
            context: Arc::new(HostContext::capture()),
            event_tx,
            pending_tx,
            pending_rx,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply a configuration.
    ///
    /// Nothing is changed if validation fails.
    ///
    /// # Errors
    ///
    /// `LogError::InvalidState` while running; `LogError::Configuration` for
    /// a bad level set, an unknown history formatter or an unusable writer
    /// name.
    pub fn init(&mut self, config: EngineConfig) -> LogResult<&mut Self> {
        if self.is_running() {
            return Err(LogError::InvalidState(
                "Cannot initialize while running; stop first".to_string(),
            ));
        }

        let mut config = config;
        let mut levels = self.levels.clone();
        levels.configure(&config.levels)?;

        let history_formatter = self
            .plugins
            .formatter(&config.history_formatter)
            .ok_or_else(|| {
                LogError::config(format!(
                    "Unknown history formatter '{}'",
                    config.history_formatter
                ))
            })?;

        let in_child = !config.disable_sub_processes && relay::is_subprocess();
        let notices_disabled = config.disable_logging_notices.unwrap_or(in_child);
        config.disable_logging_notices = Some(notices_disabled);

        if config.writers.is_empty() {
            config.writers.push(if in_child {
                WriterSpec::new("subprocess", "subprocess").formatter("subprocess")
            } else {
                WriterSpec::new("console", "console").formatter("text")
            });
        }
        for spec in &mut config.writers {
            let name = sanitize_writer_name(&spec.name);
            if name.is_empty() {
                return Err(LogError::config(format!(
                    "Writer name '{}' has no usable characters",
                    spec.name
                )));
            }
            spec.name = name;
        }

        let notice_level = if notices_disabled {
            None
        } else {
            levels
                .lookup(&config.logging_notices_level)
                .or_else(|| levels.last())
                .cloned()
        };

        self.levels = levels;
        self.history_enabled = config.history;
        self.history.set_limit(config.history_size_limit);
        self.history_formatter = Some(history_formatter);
        self.backlog_limit = config.backlog_size_limit;
        if let Some(backlog) = self.backlog.as_mut() {
            backlog.set_limit(config.backlog_size_limit);
        }
        self.notice_level = notice_level;
        info!(levels = ?self.levels.names(), writers = config.writers.len(), "Logbus configured");
        self.config = Some(config);
        self.state = EngineState::Configured;

        self.notice("Logbus initialized.")?;
        self.emit(EngineEvent::Initialized);
        Ok(self)
    }

    /// Start dispatching.
    ///
    /// Every writer type and formatter is resolved before any writer is
    /// built; if any writer fails to build, or a captured subprocess cannot
    /// be bound, the writers already built are closed and the engine stays
    /// stopped with its backlog intact. Once running, the backlog is drained
    /// in full and the first dispatch failure, if any, is returned.
    pub fn start(&mut self) -> LogResult<&mut Self> {
        if self.is_running() {
            return Ok(self);
        }
        if self.config.is_none() {
            self.init(EngineConfig::default())?;
        }
        let specs = self
            .config
            .as_ref()
            .map(|c| c.writers.clone())
            .unwrap_or_default();

        let mut resolved = Vec::with_capacity(specs.len());
        for spec in &specs {
            let factory = self.plugins.writer(&spec.kind).ok_or_else(|| {
                LogError::config(format!(
                    "Writer '{}' has unknown type '{}'",
                    spec.name, spec.kind
                ))
            })?;
            let formatter = self.plugins.formatter(&spec.formatter).ok_or_else(|| {
                LogError::config(format!(
                    "Writer '{}' has unknown formatter '{}'",
                    spec.name, spec.formatter
                ))
            })?;
            resolved.push((spec, factory, formatter));
        }

        let mut instances: Vec<WriterInstance> = Vec::with_capacity(resolved.len());
        for (spec, factory, formatter) in resolved {
            let ctx = WriterContext {
                name: spec.name.clone(),
                levels: spec.levels.clone(),
                formatter: spec.formatter.clone(),
                options: spec.options.clone(),
                handle: self.handle(),
                host: Arc::clone(&self.context),
            };
            match factory(&ctx) {
                Ok(writer) => {
                    let filter = LevelFilter::parse(&spec.levels);
                    self.warn_unknown_filter_levels(&spec.name, &filter);
                    instances.push(WriterInstance::new(&spec.name, filter, formatter, writer));
                }
                Err(e) => {
                    warn!(writer = %spec.name, error = %e, "Writer failed to start");
                    close_all(instances);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.relay.activate_all() {
            warn!(error = %e, "Subprocess relay failed to start");
            self.relay.deactivate_all();
            close_all(instances);
            return Err(e);
        }
        self.writers = instances;
        self.history.clear();
        self.state = EngineState::Running;
        info!(writers = self.writers.len(), "Logbus started");

        let failure = self.drain_backlog();
        let notice = self.notice("Logbus started.");
        self.emit(EngineEvent::Started);
        self.drain_pending();
        match failure.or(notice.err()) {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    /// Stop dispatching and close every writer.
    ///
    /// All writers are flushed and closed even if one of them fails; the
    /// first failure is returned after the engine has stopped.
    pub fn stop(&mut self) -> LogResult<&mut Self> {
        if !self.is_running() {
            return Ok(self);
        }
        self.relay.deactivate_all();
        self.backlog = Some(Backlog::new(self.backlog_limit));
        self.state = EngineState::Configured;

        let mut failure = None;
        for mut writer in std::mem::take(&mut self.writers) {
            if let Err(e) = writer.flush().and_then(|_| writer.close()) {
                warn!(writer = %writer.name(), error = %e, "Failed to close writer");
                failure.get_or_insert(e);
            }
        }
        info!("Logbus stopped");

        self.notice("Logbus stopped.")?;
        self.emit(EngineEvent::Stopped);
        match failure {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    /// Buffer entries without stopping the writers.
    pub fn pause(&mut self) -> LogResult<&mut Self> {
        if self.state != EngineState::Running {
            return Ok(self);
        }
        self.backlog = Some(Backlog::new(self.backlog_limit));
        self.state = EngineState::Paused;
        self.notice("Logbus paused.")?;
        self.emit(EngineEvent::Paused);
        Ok(self)
    }

    /// Deliver everything buffered since `pause()`, in order.
    ///
    /// A writer failure on one buffered entry does not hold back the rest;
    /// the first failure is returned once the backlog is empty.
    pub fn resume(&mut self) -> LogResult<&mut Self> {
        if self.state != EngineState::Paused {
            return Ok(self);
        }
        self.state = EngineState::Running;
        let failure = self.drain_backlog();
        let notice = self.notice("Logbus resumed.");
        self.emit(EngineEvent::Resumed);
        self.drain_pending();
        match failure.or(notice.err()) {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    pub fn clear_history(&mut self) -> &mut Self {
        self.history.clear();
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Logging
    // ═══════════════════════════════════════════════════════════════════════

    /// Log one entry.
    ///
    /// `system` defaults to the calling file's stem. The entry goes to the
    /// backlog while stopped or paused, and through dispatch otherwise. A
    /// failing writer aborts the remaining writers of this pass and its error
    /// is returned. Calls queued through a [`LogHandle`] are replayed
    /// afterwards; their failures are logged, never returned from here.
    ///
    /// # Errors
    ///
    /// `LogError::InvalidLevel` if `level` is not configured,
    /// `LogError::InvalidMessage` if the message is empty.
    #[track_caller]
    pub fn log<'a>(
        &mut self,
        level: impl Into<LevelRef<'a>>,
        system: Option<&str>,
        message: impl Into<Message>,
        args: Vec<Value>,
    ) -> LogResult<&mut Self> {
        let caller = caller_system(Location::caller());
        let level = self.resolve_level(level.into())?;
        let entry = self.build_entry(level, system, message.into(), args, &caller)?;
        self.route(entry)?;
        self.drain_pending();
        Ok(self)
    }

    /// Log a pre-built entry-like object.
    ///
    /// The level is resolved case-insensitively. A given timestamp is kept,
    /// and a given pid is reported as the entry's pid.
    #[track_caller]
    pub fn log_entry(&mut self, raw: RelayEntry) -> LogResult<&mut Self> {
        let caller = caller_system(Location::caller());
        let entry = self.entry_from_raw(raw, &caller)?;
        self.route(entry)?;
        self.drain_pending();
        Ok(self)
    }

    /// Level shortcut for one of the `info`/`INFO`/`Info` spellings.
    pub fn shortcut(&mut self, name: &str) -> Option<Shortcut<'_>> {
        let level = self.levels.shortcut(name)?.clone();
        Some(Shortcut {
            engine: self,
            level,
        })
    }

    pub fn shortcut_names(&self) -> Vec<String> {
        self.levels.shortcut_names()
    }

    /// A cloneable handle for logging from writers and other threads.
    pub fn handle(&self) -> LogHandle {
        LogHandle::new(self.pending_tx.clone())
    }

    /// Handle queued log calls and relayed messages.
    ///
    /// Relayed messages are processed in arrival order. Every pending item is
    /// attempted even when an earlier one fails. Returns how many items were
    /// handled.
    ///
    /// # Errors
    ///
    /// The first failure among the pending items, for example
    /// `LogError::InvalidLevel` if a relayed entry carries a level this
    /// engine does not know.
    pub fn process_pending(&mut self) -> LogResult<usize> {
        let mut handled = 0;
        let mut failure = None;
        while let Some(envelope) = self.relay.try_next() {
            handled += 1;
            if let Err(e) = self.handle_relay(envelope) {
                failure.get_or_insert(e);
            }
            let (queued, queued_failure) = self.drain_pending();
            handled += queued;
            if let Some(e) = queued_failure {
                failure.get_or_insert(e);
            }
        }
        let (queued, queued_failure) = self.drain_pending();
        handled += queued;
        match failure.or(queued_failure) {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Plugins and subprocesses
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a writer type.
    pub fn define_writer<F>(&mut self, name: &str, factory: F) -> LogResult<&mut Self>
    where
        F: Fn(&WriterContext) -> LogResult<Box<dyn LogWriter>> + Send + Sync + 'static,
    {
        let name = self.plugins.define_writer(name, factory)?;
        debug!(%name, "Writer defined");
        self.emit(EngineEvent::WriterAdded(name));
        Ok(self)
    }

    /// Register a formatter.
    pub fn define_formatter<F>(&mut self, name: &str, formatter: F) -> LogResult<&mut Self>
    where
        F: LogFormatter + 'static,
    {
        let name = self.plugins.define_formatter(name, formatter)?;
        debug!(%name, "Formatter defined");
        self.emit(EngineEvent::FormatterAdded(name));
        Ok(self)
    }

    /// Relay a child's entries into this engine.
    ///
    /// Returns false without capturing when subprocesses are disabled or the
    /// source is already captured. A source captured while stopped starts
    /// listening on the next `start()`.
    pub fn capture_sub_process<S>(&mut self, source: S) -> LogResult<bool>
    where
        S: RelaySource + 'static,
    {
        if self.sub_processes_disabled() {
            debug!(source = source.id(), "Subprocess capture disabled");
            return Ok(false);
        }
        let active = self.is_running();
        let captured = self.relay.capture(Box::new(source), active)?;
        Ok(captured)
    }

    /// Stop relaying a source and hand it back.
    pub fn release_sub_process(&mut self, id: SourceId) -> Option<Box<dyn RelaySource>> {
        self.relay.release(id)
    }

    pub fn captured_sub_processes(&self) -> Vec<SourceId> {
        self.relay.ids()
    }

    /// Receive engine notifications.
    ///
    /// The channel holds the last 256 events. A receiver that falls further
    /// behind gets `RecvError::Lagged` with the number of events it missed,
    /// then continues from the oldest event still held.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    /// True while running or paused.
    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Running | EngineState::Paused)
    }

    pub fn is_paused(&self) -> bool {
        self.state == EngineState::Paused
    }

    /// Copy of the active configuration.
    pub fn config(&self) -> Option<EngineConfig> {
        self.config.clone()
    }

    /// Copy of the formatted history, oldest first.
    pub fn history(&self) -> Vec<Value> {
        self.history.snapshot()
    }

    pub fn history_size_limit(&self) -> usize {
        self.history.limit()
    }

    pub fn levels(&self) -> &[Level] {
        self.levels.levels()
    }

    pub fn level_names(&self) -> Vec<String> {
        self.levels.names()
    }

    /// Case-insensitive level lookup.
    pub fn get_level(&self, name: &str) -> Option<&Level> {
        self.levels.lookup(name)
    }

    pub fn defined_writers(&self) -> Vec<String> {
        self.plugins.writer_names()
    }

    pub fn defined_formatters(&self) -> Vec<String> {
        self.plugins.formatter_names()
    }

    /// Names of the running writer instances, in configured order.
    pub fn active_writers(&self) -> Vec<String> {
        self.writers.iter().map(|w| w.name().to_string()).collect()
    }

    /// Entries waiting in the backlog; `None` while dispatching.
    pub fn backlog_len(&self) -> Option<usize> {
        self.backlog.as_ref().map(Backlog::len)
    }

    pub fn host_context(&self) -> &Arc<HostContext> {
        &self.context
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internal
    // ═══════════════════════════════════════════════════════════════════════

    fn sub_processes_disabled(&self) -> bool {
        self.config
            .as_ref()
            .map_or(false, |c| c.disable_sub_processes)
    }

    fn resolve_level(&self, level: LevelRef<'_>) -> LogResult<Level> {
        let name = match &level {
            LevelRef::Name(name) => *name,
            LevelRef::Level(level) => level.name(),
        };
        self.levels
            .lookup(name)
            .cloned()
            .ok_or_else(|| LogError::InvalidLevel(name.to_string()))
    }

    fn build_entry(
        &self,
        level: Level,
        system: Option<&str>,
        message: Message,
        mut args: Vec<Value>,
        caller: &str,
    ) -> LogResult<LogEntry> {
        let system = system
            .map(sanitize_system)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| caller.to_string());
        let (message, detail) = message.into_parts();
        if message.trim().is_empty() {
            return Err(LogError::InvalidMessage(
                "Log message is empty".to_string(),
            ));
        }
        if let Some(detail) = detail {
            args.insert(0, detail);
        }
        Ok(LogEntry {
            level,
            system,
            message,
            args,
            timestamp: Utc::now().timestamp_millis(),
            relayed_pid: None,
            context: Arc::clone(&self.context),
        })
    }

    fn entry_from_raw(&self, raw: RelayEntry, caller: &str) -> LogResult<LogEntry> {
        let level = self.resolve_level(LevelRef::Name(&raw.level))?;
        let mut entry = self.build_entry(
            level,
            Some(&raw.system),
            Message::Plain(raw.message),
            raw.args,
            caller,
        )?;
        if let Some(timestamp) = raw.timestamp {
            entry.timestamp = timestamp;
        }
        entry.relayed_pid = raw.pid.filter(|pid| *pid != self.context.pid);
        Ok(entry)
    }

    fn handle_relay(&mut self, envelope: RelayEnvelope) -> LogResult<()> {
        let RelayMessage::Log { entry } = envelope.message;
        if self.levels.lookup(&entry.level).is_none() {
            warn!(source = envelope.source, level = %entry.level, "Relayed entry has unknown level");
            return Err(LogError::InvalidLevel(format!(
                "relayed level '{}' is not configured",
                entry.level
            )));
        }
        let entry = self.entry_from_raw(entry, RELAY_SYSTEM)?;
        self.route(entry)
    }

    /// Backlog or dispatch, then notify.
    fn route(&mut self, entry: LogEntry) -> LogResult<()> {
        let result = match self.backlog.as_mut() {
            Some(backlog) => {
                let dropped = backlog.push(entry.clone());
                if dropped > 0 {
                    debug!(dropped, limit = backlog.limit(), "Backlog overflow");
                }
                Ok(())
            }
            None => self.dispatch(&entry),
        };
        self.emit(EngineEvent::Log(Box::new(entry)));
        result
    }

    fn dispatch(&mut self, entry: &LogEntry) -> LogResult<()> {
        if self.history_enabled {
            if let Some(formatter) = &self.history_formatter {
                self.history.record(formatter.format(entry));
            }
        }
        for writer in self.writers.iter_mut() {
            if writer.takes_level(&entry.level) {
                writer.dispatch(entry)?;
            }
        }
        Ok(())
    }

    /// Replay every call queued through a [`LogHandle`].
    ///
    /// A failing call is logged and skipped; the count and the first failure
    /// are returned.
    fn drain_pending(&mut self) -> (usize, Option<LogError>) {
        let mut handled = 0;
        let mut failure = None;
        while let Ok(pending) = self.pending_rx.try_recv() {
            handled += 1;
            if let Err(e) = self.replay_pending(pending) {
                warn!(error = %e, "Queued log call failed");
                failure.get_or_insert(e);
            }
        }
        (handled, failure)
    }

    fn replay_pending(&mut self, pending: PendingLog) -> LogResult<()> {
        let lenient = pending.lenient;
        let level = match self.levels.lookup(&pending.level) {
            Some(level) => level.clone(),
            None if lenient => return Ok(()),
            None => return Err(LogError::InvalidLevel(pending.level)),
        };
        let entry = match self.build_entry(
            level,
            pending.system.as_deref(),
            Message::Plain(pending.message),
            pending.args,
            &pending.caller,
        ) {
            Ok(entry) => entry,
            Err(_) if lenient => return Ok(()),
            Err(e) => return Err(e),
        };
        self.route(entry)
    }

    /// Dispatch every backlogged entry in arrival order.
    ///
    /// A failing entry does not stop the ones after it; the first failure is
    /// returned.
    fn drain_backlog(&mut self) -> Option<LogError> {
        let mut failure = None;
        if let Some(mut backlog) = self.backlog.take() {
            for entry in backlog.drain() {
                if let Err(e) = self.dispatch(&entry) {
                    warn!(system = %entry.system, error = %e, "Backlogged entry failed to dispatch");
                    failure.get_or_insert(e);
                }
            }
        }
        failure
    }

    fn notice(&mut self, message: &str) -> LogResult<()> {
        let Some(level) = self.notice_level.clone() else {
            return Ok(());
        };
        let entry = self.build_entry(
            level,
            Some(NOTICE_SYSTEM),
            Message::from(message),
            Vec::new(),
            NOTICE_SYSTEM,
        )?;
        self.route(entry)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    fn warn_unknown_filter_levels(&self, writer: &str, filter: &LevelFilter) {
        if let LevelFilter::Only(names) = filter {
            for name in names.iter().filter(|n| self.levels.lookup(n).is_none()) {
                warn!(%writer, level = %name, "Writer filter names an unknown level");
            }
        }
    }
}

/// Close writers that will never be started, logging failures.
fn close_all(instances: Vec<WriterInstance>) {
    for mut built in instances {
        if let Err(e) = built.close() {
            warn!(writer = %built.name(), error = %e, "Failed to close writer");
        }
    }
}

/// Writer names keep only `[A-Za-z0-9_]`.
fn sanitize_writer_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// A level-bound logging entry point from [`Engine::shortcut`].
pub struct Shortcut<'e> {
    engine: &'e mut Engine,
    level: Level,
}

impl<'e> Shortcut<'e> {
    pub fn level(&self) -> &Level {
        &self.level
    }

    #[track_caller]
    pub fn log(self, message: impl Into<Message>) -> LogResult<&'e mut Engine> {
        let Shortcut { engine, level } = self;
        engine.log(level, None, message, Vec::new())
    }

    #[track_caller]
    pub fn log_args(self, message: impl Into<Message>, args: Vec<Value>) -> LogResult<&'e mut Engine> {
        let Shortcut { engine, level } = self;
        engine.log(level, None, message, args)
    }

    #[track_caller]
    pub fn log_system(
        self,
        system: &str,
        message: impl Into<Message>,
        args: Vec<Value>,
    ) -> LogResult<&'e mut Engine> {
        let Shortcut { engine, level } = self;
        engine.log(level, Some(system), message, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiet() -> EngineConfig {
        EngineConfig::default()
            .without_notices()
            .with_writer(WriterSpec::new("null", "null"))
    }

    #[test]
    fn test_new_engine_registers_builtins() {
        let engine = Engine::new();
        assert_eq!(engine.state(), EngineState::Unconfigured);
        assert!(!engine.is_initialized());
        assert!(engine.defined_writers().contains(&"file".to_string()));
        assert!(engine.defined_formatters().contains(&"csv".to_string()));
        assert_eq!(engine.level_names(), vec!["ACCESS", "ERROR", "WARN", "INFO", "DEBUG"]);
        assert_eq!(engine.backlog_len(), Some(0));

        let empty = Engine::empty();
        assert!(empty.defined_writers().is_empty());
    }

    #[test]
    fn test_log_before_start_goes_to_backlog() {
        let mut engine = Engine::new();
        engine.log("info", None, "early", vec![]).unwrap();
        assert_eq!(engine.backlog_len(), Some(1));
        assert!(engine.history().is_empty());

        engine.init(quiet()).unwrap();
        engine.start().unwrap();
        assert_eq!(engine.backlog_len(), None);
        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["message"], "early");
        assert_eq!(history[0]["system"], "engine");
    }

    #[test]
    fn test_invalid_level_and_message() {
        let mut engine = Engine::new();
        engine.init(quiet()).unwrap();
        engine.start().unwrap();

        let err = engine.log("trace", None, "x", vec![]).unwrap_err();
        assert!(matches!(err, LogError::InvalidLevel(_)));
        let err = engine.log("info", None, "   ", vec![]).unwrap_err();
        assert!(matches!(err, LogError::InvalidMessage(_)));

        // engine is unaffected
        engine.log("INFO", Some("ok"), "fine", vec![json!(1)]).unwrap();
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_init_while_running_is_rejected() {
        let mut engine = Engine::new();
        engine.start().unwrap();
        let err = engine.init(quiet()).unwrap_err();
        assert!(matches!(err, LogError::InvalidState(_)));
        engine.stop().unwrap();
        engine.init(quiet()).unwrap();
    }

    #[test]
    fn test_unknown_history_formatter_keeps_previous_config() {
        let mut engine = Engine::new();
        engine.init(quiet().with_levels("a,b")).unwrap();
        let err = engine
            .init(quiet().with_levels("c").with_history_formatter("nope"))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(engine.level_names(), vec!["A", "B"]);
    }

    #[test]
    fn test_shortcuts_follow_levels() {
        let mut engine = Engine::new();
        engine.init(quiet().with_levels("notice,fatal")).unwrap();
        assert!(engine.shortcut("info").is_none());
        assert_eq!(engine.shortcut_names().len(), 6);

        engine.start().unwrap();
        engine.shortcut("Fatal").unwrap().log("bad").unwrap();
        engine
            .shortcut("notice")
            .unwrap()
            .log_system("svc", "hi", vec![json!("x")])
            .unwrap();
        let history = engine.history();
        assert_eq!(history[0]["level"], "FATAL");
        assert_eq!(history[0]["system"], "engine");
        assert_eq!(history[1]["system"], "svc");
        assert_eq!(history[1]["args"], json!(["x"]));
    }

    #[test]
    fn test_error_message_is_prepended_to_args() {
        let mut engine = Engine::new();
        engine.init(quiet()).unwrap();
        engine.start().unwrap();
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        engine
            .log("error", None, Message::from_error(&io), vec![json!(2)])
            .unwrap();
        let record = &engine.history()[0];
        assert_eq!(record["message"], "disk full");
        assert_eq!(record["args"][0]["error"], "disk full");
        assert_eq!(record["args"][1], json!(2));
    }

    #[test]
    fn test_notice_level_falls_back_to_last_level() {
        let mut engine = Engine::new();
        engine
            .init(
                EngineConfig::default()
                    .with_levels("error,trace")
                    .with_notices_level("info")
                    .with_writer(WriterSpec::new("null", "null")),
            )
            .unwrap();
        engine.start().unwrap();
        let history = engine.history();
        // the init notice was in the backlog, then the start notice
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["message"], "Logbus initialized.");
        assert_eq!(history[1]["level"], "TRACE");
        assert_eq!(history[1]["system"], "logbus");
    }

    #[test]
    fn test_writer_names_are_sanitized() {
        let mut engine = Engine::new();
        engine
            .init(quiet().with_writer(WriterSpec::new("my disk!", "null")))
            .unwrap();
        let names: Vec<_> = engine.config().unwrap().writers.into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["null", "mydisk"]);

        assert!(engine
            .init(quiet().with_writer(WriterSpec::new("!!", "null")))
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_handle_logs_are_drained_after_log() {
        let mut engine = Engine::new();
        engine.init(quiet()).unwrap();
        engine.start().unwrap();
        let handle = engine.handle();
        assert!(handle.log("warn", "queued"));
        engine.log("info", None, "direct", vec![]).unwrap();

        let messages: Vec<_> = engine.history().iter().map(|r| r["message"].clone()).collect();
        assert_eq!(messages, vec![json!("direct"), json!("queued")]);
    }

    #[test]
    fn test_failed_queued_call_does_not_fail_outer_log() {
        let mut engine = Engine::new();
        engine.init(quiet()).unwrap();
        engine.start().unwrap();
        let handle = engine.handle();
        assert!(handle.log("bogus", "unknown level"));
        assert!(handle.log("warn", "queued after"));

        engine.log("info", None, "valid call", vec![]).unwrap();
        let messages: Vec<_> = engine.history().iter().map(|r| r["message"].clone()).collect();
        assert_eq!(messages, vec![json!("valid call"), json!("queued after")]);

        // the pump reports the failure to whoever drives it
        assert!(handle.log("bogus", "again"));
        let err = engine.process_pending().unwrap_err();
        assert!(matches!(err, LogError::InvalidLevel(ref level) if level == "bogus"));
        assert_eq!(engine.process_pending().unwrap(), 0);
    }

    #[test]
    fn test_slow_event_subscriber_sees_lag() {
        use tokio::sync::broadcast::error::TryRecvError;

        let mut engine = Engine::new();
        engine.init(quiet()).unwrap();
        let mut events = engine.subscribe_events();
        for n in 0..EVENT_CHANNEL_CAPACITY + 10 {
            engine.log("info", None, format!("m{}", n), vec![]).unwrap();
        }
        assert!(matches!(events.try_recv(), Err(TryRecvError::Lagged(10))));
        let next = events.try_recv().unwrap();
        assert_eq!(next.entry().map(|e| e.message.as_str()), Some("m10"));
    }

    #[test]
    fn test_log_entry_keeps_timestamp_and_pid() {
        let mut engine = Engine::new();
        engine.init(quiet()).unwrap();
        engine.start().unwrap();
        engine
            .log_entry(RelayEntry {
                level: "Warn".into(),
                system: "child".into(),
                message: "raw".into(),
                args: vec![],
                timestamp: Some(42),
                pid: Some(1),
            })
            .unwrap();
        let record = &engine.history()[0];
        assert_eq!(record["timestamp"], 42);
        assert_eq!(record["pid"], 1);
        assert_eq!(record["level"], "WARN");
    }
}
