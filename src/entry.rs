//! Log input model and enrichment.
//!
//! Raw input (text, a JSON object, or a sequence of either) is validated and
//! turned into serialized entries stamped with the session id, the origin
//! URL and a UTC timestamp. Serialization happens once, here; the queue only
//! ever holds the resulting strings.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use url::Url;

use crate::session::SessionIdentity;

/// Field carrying plain-text messages.
pub const MESSAGE_FIELD: &str = "message";

/// Format used for entry timestamps, e.g. `Mon, 19 Oct 2026 07:35:00 GMT`.
const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Origin used when the host does not supply one and the executable path
/// cannot be resolved.
const UNKNOWN_ORIGIN: &str = "about:blank";

/// One element of a log call.
#[derive(Debug, Clone, PartialEq)]
pub enum LogItem {
    /// A text message.
    Text(String),
    /// Structured fields merged into the entry.
    Fields(Map<String, Value>),
    /// A non-string scalar (number, boolean, nested array) logged as a message.
    Scalar(Value),
    /// An absent value (`null`).
    Missing,
}

impl LogItem {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            LogItem::Missing => Err(ValidationError::MissingValue),
            LogItem::Text(text) if text.is_empty() => Err(ValidationError::EmptyString),
            LogItem::Fields(fields) if fields.is_empty() => Err(ValidationError::EmptyObject),
            _ => Ok(()),
        }
    }
}

impl From<&str> for LogItem {
    fn from(text: &str) -> Self {
        LogItem::Text(text.to_string())
    }
}

impl From<String> for LogItem {
    fn from(text: String) -> Self {
        LogItem::Text(text)
    }
}

impl From<Map<String, Value>> for LogItem {
    fn from(fields: Map<String, Value>) -> Self {
        LogItem::Fields(fields)
    }
}

impl From<Value> for LogItem {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => LogItem::Missing,
            Value::String(text) => LogItem::Text(text),
            Value::Object(fields) => LogItem::Fields(fields),
            other => LogItem::Scalar(other),
        }
    }
}

impl<T: Into<LogItem>> From<Option<T>> for LogItem {
    fn from(value: Option<T>) -> Self {
        value.map_or(LogItem::Missing, Into::into)
    }
}

/// The input of a single `log` call.
#[derive(Debug, Clone, PartialEq)]
pub enum LogMessage {
    Single(LogItem),
    Sequence(Vec<LogItem>),
}

impl LogMessage {
    /// Check every element; any invalid element rejects the whole message.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            LogMessage::Single(item) => item.validate(),
            LogMessage::Sequence(items) if items.is_empty() => Err(ValidationError::EmptySequence),
            LogMessage::Sequence(items) => items.iter().try_for_each(LogItem::validate),
        }
    }

    /// Number of entries this message produces once enriched.
    pub fn len(&self) -> usize {
        match self {
            LogMessage::Single(_) => 1,
            LogMessage::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn items(&self) -> &[LogItem] {
        match self {
            LogMessage::Single(item) => std::slice::from_ref(item),
            LogMessage::Sequence(items) => items,
        }
    }
}

impl From<LogItem> for LogMessage {
    fn from(item: LogItem) -> Self {
        LogMessage::Single(item)
    }
}

impl From<&str> for LogMessage {
    fn from(text: &str) -> Self {
        LogMessage::Single(text.into())
    }
}

impl From<String> for LogMessage {
    fn from(text: String) -> Self {
        LogMessage::Single(text.into())
    }
}

impl From<Map<String, Value>> for LogMessage {
    fn from(fields: Map<String, Value>) -> Self {
        LogMessage::Single(fields.into())
    }
}

impl From<Value> for LogMessage {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => LogMessage::Sequence(items.into_iter().map(LogItem::from).collect()),
            other => LogMessage::Single(other.into()),
        }
    }
}

impl<T: Into<LogItem>> From<Vec<T>> for LogMessage {
    fn from(items: Vec<T>) -> Self {
        LogMessage::Sequence(items.into_iter().map(Into::into).collect())
    }
}

/// Per-call overrides for `log`.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Adopt this session (and persist it) before stamping the entries.
    pub session_key: Option<String>,
    /// Stamp the entries with this time instead of now.
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Reasons a log call is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The value (or one of the sequence elements) is absent
    MissingValue,

    /// A text message is empty
    EmptyString,

    /// A structured message has no fields
    EmptyObject,

    /// A sequence has no elements
    EmptySequence,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingValue => write!(f, "a value to log is required"),
            ValidationError::EmptyString => write!(f, "a non-empty message is required"),
            ValidationError::EmptyObject => write!(f, "a non-empty JSON object is required"),
            ValidationError::EmptySequence => write!(f, "a non-empty list of values is required"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Characters kept as-is when encoding a location that is not an absolute
/// URL: the URI reserved and unreserved marks, plus `#`.
const LOCATION_KEEP: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// The percent-encoded location stamped on every entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin(String);

impl Origin {
    /// Normalize `location`. Absolute URLs are serialized by the URL parser,
    /// anything else is percent-encoded with URI delimiters kept.
    pub fn new(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) => Origin(url.to_string()),
            Err(_) => Origin(utf8_percent_encode(location, LOCATION_KEEP).to_string()),
        }
    }

    /// A `file://` URL for the running executable.
    pub fn current_process() -> Self {
        std::env::current_exe()
            .ok()
            .and_then(|path| Url::from_file_path(path).ok())
            .map(|url| Origin(url.to_string()))
            .unwrap_or_else(|| Origin(UNKNOWN_ORIGIN.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Origin {
    fn default() -> Self {
        Origin::current_process()
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format a timestamp the way entries carry it.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Turns validated log input into serialized entries.
#[derive(Debug, Clone, Default)]
pub struct Enricher {
    origin: Origin,
}

impl Enricher {
    pub fn new(origin: Origin) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Validate `message` and serialize one compact JSON entry per element.
    ///
    /// Nothing is produced if any element is invalid. The session is only
    /// touched once validation has passed.
    pub fn enrich(
        &self,
        message: &LogMessage,
        options: &LogOptions,
        session: &mut SessionIdentity,
    ) -> Result<Vec<String>, ValidationError> {
        message.validate()?;

        let session_id = session.ensure(options.session_key.as_deref()).to_string();
        let timestamp = format_timestamp(&options.timestamp.unwrap_or_else(Utc::now));

        let entries = message
            .items()
            .iter()
            .map(|item| self.stamp(item, &session_id, &timestamp).to_string())
            .collect();

        Ok(entries)
    }

    fn stamp(&self, item: &LogItem, session_id: &str, timestamp: &str) -> Value {
        let mut entry = Map::new();

        match item {
            LogItem::Text(text) => {
                entry.insert(MESSAGE_FIELD.to_string(), Value::String(text.clone()));
                self.insert_context(&mut entry, session_id, timestamp);
            }
            LogItem::Scalar(value) => {
                entry.insert(MESSAGE_FIELD.to_string(), value.clone());
                self.insert_context(&mut entry, session_id, timestamp);
            }
            LogItem::Fields(fields) => {
                self.insert_context(&mut entry, session_id, timestamp);
                // Caller's fields overwrite the context on collision.
                for (key, value) in fields {
                    entry.insert(key.clone(), value.clone());
                }
            }
            LogItem::Missing => {}
        }

        Value::Object(entry)
    }

    fn insert_context(&self, entry: &mut Map<String, Value>, session_id: &str, timestamp: &str) {
        entry.insert("sessionId".to_string(), Value::String(session_id.to_string()));
        entry.insert("url".to_string(), Value::String(self.origin.as_str().to_string()));
        entry.insert("timestamp".to_string(), Value::String(timestamp.to_string()));
    }
}
