use chrono::NaiveDateTime;
use serde::Deserialize;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

pub const TIMESTAMP_FIELD: &str = "Timestamp";
pub const LEVEL_FIELD: &str = "Level";
pub const SOURCE_NAME_FIELD: &str = "SourceName";
pub const MESSAGE_FIELD: &str = "Message";

/// severity of a log record, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    #[default]
    Undefined,
    Verbose,
    Trace,
    Debug,
    Info,
    Success,
    Warn,
    Failure,
    Error,
    Fatal,
}

impl LogLevel {
    pub const ALL: [LogLevel; 10] = [
        LogLevel::Undefined,
        LogLevel::Verbose,
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Success,
        LogLevel::Warn,
        LogLevel::Failure,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Undefined => "Undefined",
            LogLevel::Verbose => "Verbose",
            LogLevel::Trace => "Trace",
            LogLevel::Debug => "Debug",
            LogLevel::Info => "Info",
            LogLevel::Success => "Success",
            LogLevel::Warn => "Warn",
            LogLevel::Failure => "Failure",
            LogLevel::Error => "Error",
            LogLevel::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    /// case-insensitive level name, `warning` is accepted for [`LogLevel::Warn`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("warning") {
            return Ok(LogLevel::Warn);
        }
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// one typed log entry, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub(crate) id: u64,
    pub(crate) timestamp: Option<NaiveDateTime>,
    pub(crate) level: LogLevel,
    pub(crate) source_name: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) file_name: Option<Arc<str>>,
    pub(crate) line_number: Option<u64>,
    pub(crate) extra_fields: HashMap<String, String>,
}

impl LogRecord {
    /// sequence number of the record within its reader, starting from 1
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// name of the file the record was read from
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// 1-based line number of the first line of the record in its file
    pub fn line_number(&self) -> Option<u64> {
        self.line_number
    }

    /// captured values with no dedicated field
    pub fn extra_fields(&self) -> &HashMap<String, String> {
        &self.extra_fields
    }

    pub fn extra_field(&self, name: &str) -> Option<&str> {
        self.extra_fields.get(name).map(|s| s.as_str())
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(timestamp) => write!(f, "{} ", timestamp.format("%Y-%m-%d %H:%M:%S%.3f"))?,
            None => write!(f, "{:23} ", "-")?,
        }
        write!(f, "{:<9}", self.level.as_str())?;
        if let Some(source_name) = &self.source_name {
            write!(f, "{}: ", source_name)?;
        }
        f.write_str(self.message.as_deref().unwrap_or_default())
    }
}
