//! Date-templated file paths.
//!
//! A template such as `logs/app.{YYYYMMDD}.log` holds `{...}` placeholders
//! filled with Moment-style date tokens rendered in UTC. The same template
//! yields a regex that recognizes every file it could have produced, which is
//! what housekeeping scans for.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{LogError, LogResult};

/// Moment tokens and their strftime equivalents, longest first.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("YY", "%y"),
    ("MMMM", "%B"),
    ("MMM", "%b"),
    ("MM", "%m"),
    ("M", "%-m"),
    ("DDDD", "%j"),
    ("DD", "%d"),
    ("D", "%-d"),
    ("dddd", "%A"),
    ("ddd", "%a"),
    ("HH", "%H"),
    ("H", "%-H"),
    ("hh", "%I"),
    ("h", "%-I"),
    ("mm", "%M"),
    ("m", "%-M"),
    ("ss", "%S"),
    ("s", "%-S"),
    ("SSS", "%3f"),
    ("A", "%p"),
    ("a", "%P"),
    ("X", "%s"),
    ("ZZ", "%z"),
    ("Z", "%:z"),
];

/// Separator between joined stamps; never produced by a date token.
const STAMP_JOIN: &str = "|";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([\w.\-]+)\}").expect("valid placeholder regex"))
}

/// Translate a Moment-style token string into a chrono format string.
pub fn moment_to_strftime(tokens: &str) -> String {
    let mut out = String::new();
    let mut rest = tokens;
    'scan: while let Some(c) = rest.chars().next() {
        for (token, spec) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'scan;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Parse text produced by `format` back into a UTC time.
///
/// Missing parts take the start of their period: a year alone is January
/// 1st, a date alone is midnight and an hour alone is on the hour. Stamps
/// without a year never parse.
pub fn parse_stamp(value: &str, format: &str) -> Option<DateTime<Utc>> {
    if format.contains("%s") {
        return NaiveDateTime::parse_from_str(value, format)
            .ok()
            .map(|dt| dt.and_utc());
    }

    let has = |specs: &[&str]| specs.iter().any(|s| format.contains(s));
    let needs_month = !has(&["%m", "%-m", "%b", "%B", "%j"]);
    let needs_day = !has(&["%d", "%-d", "%j"]);
    let needs_minute = has(&["%H", "%-H", "%I", "%-I"]) && !has(&["%M", "%-M"]);

    let mut value = value.to_string();
    let mut format = format.to_string();
    let mut pad = |filler: &str, spec: &str| {
        value.push_str(STAMP_JOIN);
        value.push_str(filler);
        format.push_str(STAMP_JOIN);
        format.push_str(spec);
    };
    if needs_month {
        pad("01", "%m");
    }
    if needs_day {
        pad("01", "%d");
    }
    if needs_minute {
        pad("00", "%M");
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(&value, &format) {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(&value, &format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parse several captured stamps, each with its own format, as one time.
///
/// `{YYYY}/{MM}/{DD}` captures three groups that only mean something
/// together.
pub fn parse_stamps(values: &[&str], formats: &[&str]) -> Option<DateTime<Utc>> {
    if values.is_empty() || values.len() != formats.len() {
        return None;
    }
    parse_stamp(&values.join(STAMP_JOIN), &formats.join(STAMP_JOIN))
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Stamp(String),
}

/// A parsed, absolute filename template.
#[derive(Debug, Clone)]
pub struct FilenameTemplate {
    source: String,
    segments: Vec<Segment>,
    root: PathBuf,
}

impl FilenameTemplate {
    /// Parse `template`, resolving a relative path against `base`.
    pub fn parse(template: &str, base: &Path) -> LogResult<Self> {
        if template.trim().is_empty() {
            return Err(LogError::config("File writer filename is empty"));
        }
        let path = Path::new(template);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };
        let source = absolute.to_string_lossy().replace('\\', "/");

        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(&source) {
            let (Some(whole), Some(tokens)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Stamp(moment_to_strftime(tokens.as_str())));
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }

        let fixed_prefix = match source.find('{') {
            Some(idx) if segments.iter().any(|s| matches!(s, Segment::Stamp(_))) => &source[..idx],
            _ => source.as_str(),
        };
        let root = match fixed_prefix.rfind('/') {
            Some(0) => PathBuf::from("/"),
            Some(idx) => PathBuf::from(&fixed_prefix[..idx]),
            None => base.to_path_buf(),
        };

        Ok(Self {
            source,
            segments,
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Longest directory prefix that contains no placeholder.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Stamp(_)))
    }

    /// strftime formats of the placeholders, in template order.
    pub fn stamp_formats(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Stamp(format) => Some(format.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Resolve the template at `now`.
    pub fn render(&self, now: DateTime<Utc>) -> PathBuf {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Stamp(format) => out.push_str(&now.format(format).to_string()),
            }
        }
        PathBuf::from(out)
    }

    /// Regex matching any path the template can render: literals escaped,
    /// one lazy capture group per placeholder.
    pub fn matcher(&self) -> LogResult<Regex> {
        let mut pattern = String::from("^");
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Stamp(_) => pattern.push_str("(.+?)"),
            }
        }
        pattern.push('$');
        Regex::new(&pattern)
            .map_err(|e| LogError::config(format!("Invalid filename template: {}", e)))
    }
}

/// Path with forward slashes, as the matcher expects.
pub(crate) fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
