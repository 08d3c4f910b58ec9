//! Log entry types.
//!
//! A [`LogEntry`] is the unit the engine routes. Host and process details are
//! captured once in a [`HostContext`] and shared by every entry through an
//! `Arc`, so entries never copy them.

use std::error::Error as StdError;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::level::Level;

/// Snapshot of host/process details taken when the engine is constructed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostContext {
    pub hostname: String,
    pub domain: String,
    pub servername: String,
    pub pid: u32,
    pub ppid: Option<u32>,
    pub arch: String,
    pub platform: String,
    pub bits: u32,
    pub cpus: usize,
    pub argv: String,
    pub exec_path: Option<String>,
    pub starting_directory: Option<String>,
    pub homedir: Option<String>,
    pub username: Option<String>,
    pub version: String,
}

impl HostContext {
    /// Capture the current process' context.
    pub fn capture() -> Self {
        let hostname = read_hostname();
        let labels: Vec<&str> = hostname.split('.').collect();
        let domain = labels[labels.len().saturating_sub(2)..].join(".");
        let servername = labels.first().copied().unwrap_or_default().to_string();

        Self {
            domain,
            servername,
            hostname,
            pid: std::process::id(),
            ppid: parent_pid(),
            arch: std::env::consts::ARCH.to_string(),
            platform: std::env::consts::OS.to_string(),
            bits: usize::BITS,
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            argv: std::env::args().skip(1).collect::<Vec<_>>().join(" "),
            exec_path: std::env::current_exe()
                .ok()
                .map(|p| p.display().to_string()),
            starting_directory: std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string()),
            homedir: dirs::home_dir().map(|p| p.display().to_string()),
            username: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .ok(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn read_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    Some(std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
fn parent_pid() -> Option<u32> {
    None
}

/// The message argument of a log call.
///
/// An error value contributes its display text as the message and is itself
/// prepended to the argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Plain(String),
    FromError {
        message: String,
        /// Structured form of the error, prepended to `args`.
        detail: Value,
    },
}

impl Message {
    /// Build a message from any error, keeping its source chain.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        let message = err.to_string();
        Message::FromError {
            detail: json!({ "error": message, "causes": chain }),
            message,
        }
    }

    /// Split into message text and the optional leading argument.
    pub(crate) fn into_parts(self) -> (String, Option<Value>) {
        match self {
            Message::Plain(text) => (text, None),
            Message::FromError { message, detail } => (message, Some(detail)),
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Plain(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Plain(s)
    }
}

impl From<&String> for Message {
    fn from(s: &String) -> Self {
        Message::Plain(s.clone())
    }
}

/// One structured log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    /// Source tag, restricted to `[A-Za-z0-9_.-]`
    pub system: String,
    pub message: String,
    pub args: Vec<Value>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Pid of the child process this entry was relayed from, if any
    pub relayed_pid: Option<u32>,
    pub context: Arc<HostContext>,
}

/// Borrowed, flattened view used for serialization.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryRecord<'a> {
    #[serde(flatten)]
    context: &'a HostContext,
    timestamp: i64,
    level: &'a str,
    system: &'a str,
    message: &'a str,
    args: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    relayed_pid: Option<u32>,
}

impl LogEntry {
    /// Pid to report for this entry: the child's when relayed.
    pub fn pid(&self) -> u32 {
        self.relayed_pid.unwrap_or(self.context.pid)
    }

    /// The entry as a JSON object, host context included.
    pub fn to_record(&self) -> Value {
        let record = EntryRecord {
            context: &self.context,
            timestamp: self.timestamp,
            level: self.level.name(),
            system: &self.system,
            message: &self.message,
            args: &self.args,
            relayed_pid: self.relayed_pid,
        };
        let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
        if let (Some(pid), Value::Object(map)) = (self.relayed_pid, &mut value) {
            map.insert("pid".to_string(), json!(pid));
        }
        value
    }
}

/// Strip everything outside `[A-Za-z0-9_.-]` from a source tag.
pub fn sanitize_system(system: &str) -> String {
    system
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect()
}

/// Source tag for a caller location: the file stem of the calling module.
pub(crate) fn caller_system(location: &std::panic::Location<'_>) -> String {
    let file = location.file();
    let base = file.rsplit(['/', '\\']).next().unwrap_or(file);
    let stem = base.strip_suffix(".rs").unwrap_or(base);
    sanitize_system(stem)
}
