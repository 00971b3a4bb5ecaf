use crate::{
    error::ReaderError,
    record::LogLevel,
    record_builder::{TimestampEncoding, TimestampRange},
};
use std::{collections::HashMap, time::Duration};
use taillog_parser::LogPattern;

// constants
pub const DEFAULT_BUFFER_CAPACITY: usize = 8;
pub const DEFAULT_UPDATE_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 100;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1000;
pub const DEFAULT_RESTART_DELAY_WHEN_EMPTY_MS: u64 = 1000;
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_DROP_LOG_COUNT: usize = 1;

/// everything a [`LogReader`](crate::LogReader) needs to know before it starts
#[derive(Debug, Clone)]
pub struct ReaderDesc {
    pub patterns: Vec<LogPattern>,
    pub timestamp_encoding: TimestampEncoding,
    /// tried from the last one to the first one
    pub timestamp_formats: Vec<String>,
    /// raw level text to level, level names are parsed directly when empty
    pub level_map: HashMap<String, LogLevel>,
    /// capture group holding the level text, `Level` when unset
    pub level_field: Option<String>,
    pub is_continuous_reading: bool,
    pub restart_delay: Duration,
    /// lower bound of the restart delay while no record has been read
    pub restart_delay_when_empty: Duration,
    pub buffer_capacity: usize,
    pub update_chunk_size: usize,
    pub update_interval: Duration,
    pub max_log_count: Option<usize>,
    pub drop_log_count: usize,
    pub open_timeout: Duration,
    pub timestamp_range: TimestampRange,
}

impl ReaderDesc {
    pub fn new(patterns: Vec<LogPattern>) -> Self {
        Self {
            patterns,
            timestamp_encoding: TimestampEncoding::Custom,
            timestamp_formats: Vec::new(),
            level_map: HashMap::new(),
            level_field: None,
            is_continuous_reading: false,
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            restart_delay_when_empty: Duration::from_millis(DEFAULT_RESTART_DELAY_WHEN_EMPTY_MS),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            update_chunk_size: DEFAULT_UPDATE_CHUNK_SIZE,
            update_interval: Duration::from_millis(DEFAULT_UPDATE_INTERVAL_MS),
            max_log_count: None,
            drop_log_count: DEFAULT_DROP_LOG_COUNT,
            open_timeout: Duration::from_millis(DEFAULT_OPEN_TIMEOUT_MS),
            timestamp_range: TimestampRange::default(),
        }
    }

    pub fn continuous(mut self, is_continuous_reading: bool) -> Self {
        self.is_continuous_reading = is_continuous_reading;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ReaderError> {
        if self.buffer_capacity < 2 {
            return Err(ReaderError::InvalidArgument(format!(
                "buffer capacity must be at least 2, got {}",
                self.buffer_capacity
            )));
        }
        if self.max_log_count == Some(0) {
            return Err(ReaderError::InvalidArgument(
                "max log count must be positive".to_string(),
            ));
        }
        if self.update_chunk_size == 0 {
            return Err(ReaderError::InvalidArgument(
                "update chunk size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
