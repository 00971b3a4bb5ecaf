use crate::{
    desc::{
        DEFAULT_BUFFER_CAPACITY, DEFAULT_DROP_LOG_COUNT, DEFAULT_OPEN_TIMEOUT_MS,
        DEFAULT_RESTART_DELAY_MS, DEFAULT_RESTART_DELAY_WHEN_EMPTY_MS, DEFAULT_UPDATE_CHUNK_SIZE,
        DEFAULT_UPDATE_INTERVAL_MS, ReaderDesc,
    },
    provider::SourceOptions,
    record::LogLevel,
    record_builder::{TimestampEncoding, TimestampRange},
};
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, time::Duration};
use taillog_parser::LogPattern;

/// one `[[patterns]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct PatternProfile {
    pub regex: String,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// `[source]` table: provider name plus its options
#[derive(Debug, Clone, Deserialize)]
pub struct SourceProfile {
    pub provider: String,
    #[serde(flatten)]
    pub options: SourceOptions,
}

/// Reader configuration as stored in a TOML file.
///
/// ```toml
/// timestamp_formats = ["%Y-%m-%d %H:%M:%S%.3f"]
/// continuous_reading = true
///
/// [level_map]
/// I = "info"
/// E = "error"
///
/// [[patterns]]
/// regex = '^(?<Timestamp>\S+ \S+) (?<Level>\w) (?<Message>.*)$'
///
/// [source]
/// provider = "file"
/// file_name = "/var/log/app.log"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderProfile {
    #[serde(default)]
    pub name: Option<String>,
    pub patterns: Vec<PatternProfile>,
    #[serde(default)]
    pub timestamp_encoding: TimestampEncoding,
    #[serde(default)]
    pub timestamp_formats: Vec<String>,
    #[serde(default)]
    pub level_map: HashMap<String, LogLevel>,
    #[serde(default)]
    pub level_field: Option<String>,
    #[serde(default)]
    pub continuous_reading: bool,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_restart_delay_when_empty_ms")]
    pub restart_delay_when_empty_ms: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_update_chunk_size")]
    pub update_chunk_size: usize,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default)]
    pub max_log_count: Option<usize>,
    #[serde(default = "default_drop_log_count")]
    pub drop_log_count: usize,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default)]
    pub timestamp_range: TimestampRange,
    #[serde(default)]
    pub source: Option<SourceProfile>,
}

fn default_restart_delay_ms() -> u64 {
    DEFAULT_RESTART_DELAY_MS
}
fn default_restart_delay_when_empty_ms() -> u64 {
    DEFAULT_RESTART_DELAY_WHEN_EMPTY_MS
}
fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}
fn default_update_chunk_size() -> usize {
    DEFAULT_UPDATE_CHUNK_SIZE
}
fn default_update_interval_ms() -> u64 {
    DEFAULT_UPDATE_INTERVAL_MS
}
fn default_drop_log_count() -> usize {
    DEFAULT_DROP_LOG_COUNT
}
fn default_open_timeout_ms() -> u64 {
    DEFAULT_OPEN_TIMEOUT_MS
}

impl ReaderProfile {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid reader profile")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("In profile {}", path.display()))
    }

    /// compile the patterns and build the reader description
    pub fn into_desc(self) -> Result<ReaderDesc> {
        ensure!(!self.patterns.is_empty(), "Profile defines no pattern");
        let patterns = self
            .patterns
            .into_iter()
            .enumerate()
            .map(|(index, pattern)| {
                let compiled = LogPattern::parse(&pattern.regex, pattern.repeatable, pattern.skippable)
                    .with_context(|| format!("Invalid regex of pattern {}", index))?;
                Ok(match pattern.description {
                    Some(description) => compiled.with_description(description),
                    None => compiled,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut desc = ReaderDesc::new(patterns);
        desc.timestamp_encoding = self.timestamp_encoding;
        desc.timestamp_formats = self.timestamp_formats;
        desc.level_map = self.level_map;
        desc.level_field = self.level_field;
        desc.is_continuous_reading = self.continuous_reading;
        desc.restart_delay = Duration::from_millis(self.restart_delay_ms);
        desc.restart_delay_when_empty = Duration::from_millis(self.restart_delay_when_empty_ms);
        desc.buffer_capacity = self.buffer_capacity;
        desc.update_chunk_size = self.update_chunk_size;
        desc.update_interval = Duration::from_millis(self.update_interval_ms);
        desc.max_log_count = self.max_log_count;
        desc.drop_log_count = self.drop_log_count;
        desc.open_timeout = Duration::from_millis(self.open_timeout_ms);
        desc.timestamp_range = self.timestamp_range;
        desc.validate()?;
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PROFILE: &str = r#"
name = "android"
timestamp_formats = ["%m-%d %H:%M:%S%.3f"]
continuous_reading = true
max_log_count = 1000

[level_map]
I = "info"
W = "Warning"
E = "ERROR"

[[patterns]]
regex = '^(?<Timestamp>\S+ \S+) (?<Level>\w) (?<Message>.*)$'

[[patterns]]
regex = '^\s+(?<Message>.*)$'
repeatable = true
description = "continuation"

[source]
provider = "process"
command = "adb"
arguments = ["logcat"]
"#;

    #[test]
    fn test_profile_into_desc() {
        let profile = ReaderProfile::from_toml_str(PROFILE).unwrap();
        assert_eq!(profile.name.as_deref(), Some("android"));
        let source = profile.source.clone().unwrap();
        assert_eq!(source.provider, "process");
        assert_eq!(source.options.arguments, ["logcat"]);

        let desc = profile.into_desc().unwrap();
        assert_eq!(desc.patterns.len(), 2);
        assert!(desc.patterns[1].is_repeatable());
        assert_eq!(desc.patterns[1].description(), Some("continuation"));
        assert_eq!(desc.level_map.get("W"), Some(&LogLevel::Warn));
        assert_eq!(desc.level_map.get("E"), Some(&LogLevel::Error));
        assert!(desc.is_continuous_reading);
        assert_eq!(desc.max_log_count, Some(1000));
        assert_eq!(desc.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(desc.open_timeout, Duration::from_millis(DEFAULT_OPEN_TIMEOUT_MS));
    }

    #[test]
    fn test_bad_regex_names_pattern_index() {
        let text = "[[patterns]]\nregex = '^ok$'\n[[patterns]]\nregex = '(?<broken'\n";
        let err = ReaderProfile::from_toml_str(text).unwrap().into_desc().unwrap_err();
        assert_eq!(err.to_string(), "Invalid regex of pattern 1");
    }

    #[test]
    fn test_empty_patterns_rejected() {
        let profile = ReaderProfile::from_toml_str("patterns = []").unwrap();
        assert!(profile.into_desc().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ReaderProfile::from_toml_str("patterns = []\ncolour = true").is_err());
    }

    #[test]
    fn test_timestamp_encoding_and_range() {
        let text = r#"
timestamp_encoding = "unix_milliseconds"
[timestamp_range]
start = "2024-01-01T00:00:00"
[[patterns]]
regex = '^(?<Timestamp>\d+) (?<Message>.*)$'
"#;
        let desc = ReaderProfile::from_toml_str(text).unwrap().into_desc().unwrap();
        assert_eq!(desc.timestamp_encoding, TimestampEncoding::UnixMilliseconds);
        assert!(desc.timestamp_range.start.is_some());
        assert!(desc.timestamp_range.end.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PROFILE.as_bytes()).unwrap();
        let profile = ReaderProfile::load(file.path()).unwrap();
        assert_eq!(profile.patterns.len(), 2);
        assert!(ReaderProfile::load(Path::new("/nonexistent/profile.toml")).is_err());
    }
}
