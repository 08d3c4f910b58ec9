//! Date-rotated file writer with optional housekeeping.
//!
//! The target path is recomputed from the filename template on every write;
//! when it changes the current file is closed and the new one opened, so
//! rotation happens lazily on the first write of a new period. Files are
//! opened in append mode and written without buffering.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use crate::plugin::{LogWriter, WriterContext};

use super::render_lines;
use super::template::{normalize, parse_stamps, FilenameTemplate};

/// Filename used when the `filename` option is absent.
pub const DEFAULT_FILENAME: &str = "logs/logbus.{YYYYMMDD}.log";

/// Retention used for `housekeeping: true`.
pub const DEFAULT_HOUSEKEEPING_MS: u64 = 60_000;

const MIN_HOUSEKEEPING_MS: u64 = 100;
const MAX_HOUSEKEEPING_MS: u64 = 9_999_999_999;

/// Source of "now" for rendering and retention.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Appends rendered entries to a date-templated file.
pub struct FileWriter {
    template: FilenameTemplate,
    matcher: Option<Regex>,
    /// Retention; `None` disables housekeeping
    housekeeping: Option<chrono::Duration>,
    file: Option<File>,
    current: Option<PathBuf>,
    clock: Clock,
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("template", &self.template.source())
            .field("housekeeping", &self.housekeeping)
            .field("current", &self.current)
            .finish()
    }
}

impl FileWriter {
    /// Build from writer options, resolving relative filenames against `base`.
    ///
    /// Options: `filename` (template string) and `housekeeping` (`false`,
    /// `true`, or a retention in milliseconds).
    pub fn new(options: &Map<String, Value>, base: &Path) -> LogResult<Self> {
        Self::with_clock(options, base, Arc::new(Utc::now))
    }

    /// Same as [`FileWriter::new`] with an explicit time source.
    pub fn with_clock(options: &Map<String, Value>, base: &Path, clock: Clock) -> LogResult<Self> {
        let filename = match options.get("filename") {
            None | Some(Value::Null) => DEFAULT_FILENAME,
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(LogError::config(format!(
                    "File writer filename must be a string, got {}",
                    other
                )))
            }
        };
        let template = FilenameTemplate::parse(filename, base)?;
        let housekeeping = parse_housekeeping(options.get("housekeeping"))?;
        let matcher = match housekeeping {
            Some(_) if template.has_placeholders() => Some(template.matcher()?),
            _ => None,
        };

        let writer = Self {
            template,
            matcher,
            housekeeping,
            file: None,
            current: None,
            clock,
        };
        writer.housekeeping()?;
        Ok(writer)
    }

    pub fn from_context(ctx: &WriterContext) -> LogResult<Box<dyn LogWriter>> {
        let base = ctx
            .host
            .starting_directory
            .as_ref()
            .map(PathBuf::from)
            .map_or_else(std::env::current_dir, Ok)?;
        Ok(Box::new(Self::new(&ctx.options, &base)?))
    }

    /// Path the next write goes to.
    pub fn compute_filename(&self) -> PathBuf {
        self.template.render((self.clock)())
    }

    /// Path of the currently open file, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.housekeeping
    }

    /// Delete files produced by this template whose stamps are older than
    /// the retention. All placeholders of a path are read together as one
    /// time; paths that do not parse are kept. The open file is never
    /// touched. Returns the number of files removed.
    pub fn housekeeping(&self) -> LogResult<usize> {
        let (Some(max_age), Some(matcher)) = (self.housekeeping, &self.matcher) else {
            return Ok(0);
        };
        let root = self.template.root();
        if !root.is_dir() {
            return Ok(0);
        }
        let formats = self.template.stamp_formats();
        let now = (self.clock)();

        let mut removed = 0;
        for item in WalkDir::new(root) {
            let item = match item {
                Ok(item) => item,
                Err(e) if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) => continue,
                Err(e) => return Err(std::io::Error::from(e).into()),
            };
            if !item.file_type().is_file() {
                continue;
            }
            let path = item.path();
            if self.current.as_deref() == Some(path) {
                continue;
            }
            let normalized = normalize(path);
            let Some(caps) = matcher.captures(&normalized) else {
                continue;
            };
            let values: Vec<&str> = caps
                .iter()
                .skip(1)
                .map(|group| group.map_or("", |m| m.as_str()))
                .collect();
            let expired =
                parse_stamps(&values, &formats).map_or(false, |stamp| now - stamp > max_age);
            if !expired {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %path.display(), "Removed expired log file");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn open(&mut self, path: PathBuf) -> LogResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "Opened log file");
        self.file = Some(file);
        self.current = Some(path);
        Ok(())
    }

    fn close_file(&mut self) -> LogResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            if let Some(path) = self.current.take() {
                debug!(path = %path.display(), "Closed log file");
            }
        }
        self.current = None;
        self.housekeeping()?;
        Ok(())
    }
}

fn parse_housekeeping(value: Option<&Value>) -> LogResult<Option<chrono::Duration>> {
    let millis = match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Ok(None),
        Some(Value::Bool(true)) => DEFAULT_HOUSEKEEPING_MS,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(ms) if ms > 0.0 => (ms as u64).clamp(MIN_HOUSEKEEPING_MS, MAX_HOUSEKEEPING_MS),
            _ => return Ok(None),
        },
        Some(other) => {
            return Err(LogError::config(format!(
                "File writer housekeeping must be a boolean or milliseconds, got {}",
                other
            )))
        }
    };
    Ok(Some(chrono::Duration::milliseconds(millis as i64)))
}

impl LogWriter for FileWriter {
    fn write(&mut self, message: &Value, _entry: &LogEntry) -> LogResult<()> {
        let target = self.compute_filename();
        if self.file.is_none() || self.current.as_deref() != Some(target.as_path()) {
            self.close_file()?;
            self.open(target)?;
        }
        let text = render_lines(message);
        if let Some(file) = self.file.as_mut() {
            file.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    fn flush(&mut self) -> LogResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> LogResult<()> {
        self.close_file()
    }
}
