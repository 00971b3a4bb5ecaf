use crate::{
    desc::ReaderDesc,
    record::{LEVEL_FIELD, LogLevel, LogRecord, MESSAGE_FIELD, SOURCE_NAME_FIELD, TIMESTAMP_FIELD},
};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use taillog_parser::ParsedFieldSet;

/// formats tried when a custom encoding has no formats configured
const FALLBACK_TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// how the `Timestamp` capture is turned into a date-time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampEncoding {
    /// chrono format strings, tried from the last one to the first one
    #[default]
    Custom,
    Unix,
    UnixMilliseconds,
    UnixMicroseconds,
}

/// accepted timestamp range, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TimestampRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl TimestampRange {
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// records without a timestamp are always accepted
    pub fn accepts(&self, timestamp: Option<NaiveDateTime>) -> bool {
        let Some(timestamp) = timestamp else {
            return true;
        };
        self.start.is_none_or(|start| timestamp >= start)
            && self.end.is_none_or(|end| timestamp <= end)
    }
}

/// a record whose message starts with this makes `build` panic in tests
#[cfg(test)]
pub(crate) const PANIC_MESSAGE: &str = "<panic>";

/// converts parsed field sets into [`LogRecord`]s
pub(crate) struct RecordBuilder {
    encoding: TimestampEncoding,
    timestamp_formats: Vec<String>,
    level_map: HashMap<String, LogLevel>,
    level_field: String,
    timestamp_range: TimestampRange,
    file_name: Option<Arc<str>>,
    next_id: u64,
}

impl RecordBuilder {
    pub(crate) fn new(desc: &ReaderDesc, file_name: Option<Arc<str>>) -> Self {
        Self {
            encoding: desc.timestamp_encoding,
            timestamp_formats: desc.timestamp_formats.clone(),
            level_map: desc.level_map.clone(),
            level_field: desc
                .level_field
                .clone()
                .unwrap_or_else(|| LEVEL_FIELD.to_string()),
            timestamp_range: desc.timestamp_range,
            file_name,
            next_id: 1,
        }
    }

    /// None when the record falls outside the accepted timestamp range
    pub(crate) fn build(&mut self, fields: ParsedFieldSet) -> Option<LogRecord> {
        let line_number = fields.first_line();
        let mut timestamp = None;
        let mut level = LogLevel::Undefined;
        let mut source_name = None;
        let mut message = None;
        let mut extra_fields = HashMap::new();

        for (name, value) in fields {
            if name == self.level_field {
                level = self.map_level(&value);
                if name != LEVEL_FIELD {
                    extra_fields.insert(name, value);
                }
                continue;
            }
            match name.as_str() {
                TIMESTAMP_FIELD => {
                    timestamp = self.parse_timestamp(&value);
                    if timestamp.is_none() {
                        log::trace!("Unable to parse timestamp '{}'", value);
                    }
                }
                SOURCE_NAME_FIELD => source_name = Some(value),
                MESSAGE_FIELD => message = Some(value),
                _ => {
                    extra_fields.insert(name, value);
                }
            }
        }

        #[cfg(test)]
        if message.as_deref().is_some_and(|message| message.starts_with(PANIC_MESSAGE)) {
            panic!("record builder asked to fail");
        }

        if !self.timestamp_range.accepts(timestamp) {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        Some(LogRecord {
            id,
            timestamp,
            level,
            source_name,
            message,
            line_number: self.file_name.as_ref().and(line_number),
            file_name: self.file_name.clone(),
            extra_fields,
        })
    }

    fn map_level(&self, value: &str) -> LogLevel {
        if self.level_map.is_empty() {
            return value.parse().unwrap_or_default();
        }
        self.level_map.get(value).copied().unwrap_or_default()
    }

    fn parse_timestamp(&self, value: &str) -> Option<NaiveDateTime> {
        match self.encoding {
            TimestampEncoding::Custom if self.timestamp_formats.is_empty() => {
                parse_fallback(value)
            }
            TimestampEncoding::Custom => self
                .timestamp_formats
                .iter()
                .rev()
                .find_map(|format| parse_with_format(value, format)),
            TimestampEncoding::Unix => from_unix_millis(value.trim().parse::<f64>().ok()? * 1000.0),
            TimestampEncoding::UnixMilliseconds => from_unix_millis(value.trim().parse().ok()?),
            TimestampEncoding::UnixMicroseconds => {
                from_unix_millis(value.trim().parse::<f64>().ok()? / 1000.0)
            }
        }
    }
}

fn parse_with_format(value: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, format).ok().or_else(|| {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })
}

fn parse_fallback(value: &str) -> Option<NaiveDateTime> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Local).naive_local());
    }
    FALLBACK_TIMESTAMP_FORMATS
        .iter()
        .rev()
        .find_map(|format| parse_with_format(value, format))
}

/// unix time is converted to local wall-clock time
fn from_unix_millis(millis: f64) -> Option<NaiveDateTime> {
    if !millis.is_finite() {
        return None;
    }
    let utc = DateTime::from_timestamp_millis(millis.round() as i64)?;
    Some(utc.with_timezone(&Local).naive_local())
}
