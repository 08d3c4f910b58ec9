//! Session configuration.
//!
//! Every key is optional; absent keys take their defaults, so deserializing a
//! partial document is the defaults/overrides merge.
//!
//! ```ignore
//! let config = EngineConfig::from_json_str(r#"{
//!     "levels": "info,error",
//!     "historySizeLimit": 50,
//!     "writers": [{ "name": "disk", "type": "file", "levels": "error",
//!                   "options": { "filename": "logs/app.{YYYYMMDD}.log" } }]
//! }"#)?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LogResult;
use crate::level::LevelSpec;

/// Merged engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Keep formatted copies of dispatched entries
    pub history: bool,
    pub history_size_limit: usize,
    /// Formatter name used for history records
    pub history_formatter: String,
    pub levels: LevelSpec,
    /// `None` resolves to true inside a relayed child process
    pub disable_logging_notices: Option<bool>,
    pub logging_notices_level: String,
    pub writers: Vec<WriterSpec>,
    pub backlog_size_limit: usize,
    pub disable_sub_processes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history: true,
            history_size_limit: 100,
            history_formatter: "default".to_string(),
            levels: LevelSpec::default(),
            disable_logging_notices: None,
            logging_notices_level: "info".to_string(),
            writers: Vec::new(),
            backlog_size_limit: 1000,
            disable_sub_processes: false,
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json_str(json: &str) -> LogResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> LogResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn with_levels(mut self, levels: impl Into<LevelSpec>) -> Self {
        self.levels = levels.into();
        self
    }

    pub fn with_writer(mut self, writer: WriterSpec) -> Self {
        self.writers.push(writer);
        self
    }

    pub fn with_history(mut self, enabled: bool, limit: usize) -> Self {
        self.history = enabled;
        self.history_size_limit = limit;
        self
    }

    pub fn with_history_formatter(mut self, formatter: impl Into<String>) -> Self {
        self.history_formatter = formatter.into();
        self
    }

    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_size_limit = limit;
        self
    }

    pub fn without_notices(mut self) -> Self {
        self.disable_logging_notices = Some(true);
        self
    }

    pub fn with_notices_level(mut self, level: impl Into<String>) -> Self {
        self.disable_logging_notices = Some(false);
        self.logging_notices_level = level.into();
        self
    }

    pub fn without_sub_processes(mut self) -> Self {
        self.disable_sub_processes = true;
        self
    }
}

fn default_levels_filter() -> String {
    "*".to_string()
}

fn default_formatter() -> String {
    "default".to_string()
}

/// One configured output sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// `*` or a comma-separated list of level names
    #[serde(default = "default_levels_filter")]
    pub levels: String,
    #[serde(default = "default_formatter")]
    pub formatter: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl WriterSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            levels: default_levels_filter(),
            formatter: default_formatter(),
            options: Map::new(),
        }
    }

    pub fn levels(mut self, levels: impl Into<String>) -> Self {
        self.levels = levels.into();
        self
    }

    pub fn formatter(mut self, formatter: impl Into<String>) -> Self {
        self.formatter = formatter.into();
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}
