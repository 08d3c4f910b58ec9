//! Log levels and the per-session level registry.
//!
//! A session owns an ordered list of [`Level`]s. Every level is reachable
//! through three shortcut names (`info`, `INFO`, `Info`) which the engine
//! resolves through [`LevelRegistry::shortcut`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};

/// Level set used when nothing else is configured.
pub const DEFAULT_LEVELS: &str = "access,error,warn,info,debug";

/// Engine method names a level shortcut may not shadow.
pub const RESERVED_NAMES: &[&str] = &[
    "init",
    "start",
    "stop",
    "pause",
    "resume",
    "log",
    "config",
    "history",
    "levels",
    "running",
    "initialized",
    "shortcut",
    "handle",
    "level",
];

/// An immutable severity level, identified by its uppercase name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Level(String);

impl Level {
    /// Create a level from a name. Surrounding whitespace is ignored; the
    /// remaining characters must be alphanumeric, `_` or `-`.
    pub fn new(name: &str) -> LogResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LogError::config("Level name is empty"));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(LogError::config(format!(
                "Invalid level name '{}': unexpected character '{}'",
                name, bad
            )));
        }
        Ok(Self(name.to_ascii_uppercase()))
    }

    /// The normalized uppercase name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// The three shortcut spellings: lower, upper and capitalized.
    pub fn variants(&self) -> [String; 3] {
        let lower = self.0.to_ascii_lowercase();
        let mut capitalized = lower.clone();
        if let Some(first) = capitalized.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        [lower, self.0.clone(), capitalized]
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Level {
    type Error = LogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Level::new(&value)
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.0
    }
}

/// Level configuration: a comma-separated string or a list of names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelSpec {
    /// `"access,error,warn,info,debug"`
    Csv(String),
    /// `["access", "error"]`
    List(Vec<String>),
}

impl LevelSpec {
    /// Raw names, split and trimmed; empty items are dropped.
    pub fn names(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            LevelSpec::Csv(s) => s.split(',').collect(),
            LevelSpec::List(items) => items.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for LevelSpec {
    fn default() -> Self {
        LevelSpec::Csv(DEFAULT_LEVELS.to_string())
    }
}

impl From<&str> for LevelSpec {
    fn from(s: &str) -> Self {
        LevelSpec::Csv(s.to_string())
    }
}

impl From<Vec<Level>> for LevelSpec {
    fn from(levels: Vec<Level>) -> Self {
        LevelSpec::List(levels.into_iter().map(String::from).collect())
    }
}

impl From<Vec<&str>> for LevelSpec {
    fn from(names: Vec<&str>) -> Self {
        LevelSpec::List(names.into_iter().map(str::to_string).collect())
    }
}

/// Ordered set of levels for the current session plus the shortcut table.
#[derive(Debug, Clone, Default)]
pub struct LevelRegistry {
    levels: Vec<Level>,
    shortcuts: HashMap<String, Level>,
}

impl LevelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the level set.
    ///
    /// The new set is validated in full before anything is swapped in, so a
    /// failed call leaves the previous levels and shortcuts bound.
    ///
    /// # Errors
    ///
    /// Returns `LogError::Configuration` if no names are given, a name is
    /// malformed or duplicated, or a shortcut would shadow a reserved name.
    pub fn configure(&mut self, spec: &LevelSpec) -> LogResult<()> {
        let names = spec.names();
        if names.is_empty() {
            return Err(LogError::config("No levels configured"));
        }

        let mut levels: Vec<Level> = Vec::with_capacity(names.len());
        let mut shortcuts = HashMap::new();
        for name in &names {
            let level = Level::new(name)?;
            if levels.contains(&level) {
                return Err(LogError::config(format!(
                    "Duplicate log level '{}'",
                    level
                )));
            }
            for variant in level.variants() {
                if RESERVED_NAMES.contains(&variant.as_str()) {
                    return Err(LogError::config(format!(
                        "Invalid log level: '{}' is a reserved word",
                        level
                    )));
                }
                shortcuts.insert(variant, level.clone());
            }
            levels.push(level);
        }

        self.levels = levels;
        self.shortcuts = shortcuts;
        Ok(())
    }

    /// Case-insensitive lookup by name.
    pub fn lookup(&self, name: &str) -> Option<&Level> {
        let wanted = name.trim();
        self.levels
            .iter()
            .find(|level| level.name().eq_ignore_ascii_case(wanted))
    }

    /// Exact lookup in the shortcut table (`info`, `INFO` or `Info`).
    pub fn shortcut(&self, variant: &str) -> Option<&Level> {
        self.shortcuts.get(variant)
    }

    /// All bound shortcut names, sorted.
    pub fn shortcut_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shortcuts.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn names(&self) -> Vec<String> {
        self.levels.iter().map(|l| l.name().to_string()).collect()
    }

    pub fn last(&self) -> Option<&Level> {
        self.levels.last()
    }
}
