//! # taillog-framework
//!
//! Engine for reading logs continuously out of files, processes and sockets.
//!
//! ## Overview
//!
//! ```text
//! LogProvider ──open()──> DualBufferLineSource ──read_line()──> PatternMatcher
//! (owned by a             (fill thread prefetch)                    │
//!  LogDataSource)                                                   │ ParsedFieldSet
//!                                                                   v
//!                 LogList <──────── extend() ──────── RecordBuilder -> LogRecord
//! ```
//!
//! A [`LogReader`] drives this pipeline on its own thread and exposes its
//! progress through [`ReaderState`]. In continuous mode it reopens the data
//! source every time the stream ends, following a growing file or a
//! restarting process. A continuous reader can be paused, and any reader can
//! be restarted from scratch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taillog_framework::{LogDataSource, LogReader, ReaderDesc, ReaderState};
//! use taillog_parser::LogPattern;
//! use std::time::Duration;
//!
//! # fn provider() -> Box<dyn taillog_framework::LogProvider> { unimplemented!() }
//! let patterns = vec![
//!     LogPattern::parse(r"^(?<Level>\w) (?<Message>.*)$", false, false).unwrap(),
//! ];
//! let source = LogDataSource::from_boxed(provider());
//! let reader = LogReader::new(source, ReaderDesc::new(patterns)).unwrap();
//! reader.start().unwrap();
//! reader.wait_for_state(ReaderState::Stopped, Duration::from_secs(5));
//! for record in reader.logs().snapshot() {
//!     println!("{}", record);
//! }
//! ```

mod desc;
mod error;
mod line_source;
mod log_list;
mod profile;
mod provider;
mod reader;
mod record;
mod record_builder;

#[cfg(test)]
mod test_util;

pub use desc::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_DROP_LOG_COUNT, DEFAULT_OPEN_TIMEOUT_MS,
    DEFAULT_RESTART_DELAY_MS, DEFAULT_RESTART_DELAY_WHEN_EMPTY_MS, DEFAULT_UPDATE_CHUNK_SIZE,
    DEFAULT_UPDATE_INTERVAL_MS, ReaderDesc,
};
pub use error::ReaderError;
pub use line_source::{DualBufferLineSource, EndReason, LineSourceHandle};
pub use log_list::LogList;
pub use profile::{PatternProfile, ReaderProfile, SourceProfile};
pub use provider::{
    AbortHandle, BufLineReader, DataSourceState, LineRead, LogDataSource, LogProvider, OpenError,
    Preparation, SourceOptions, SourceReader, SourceRegistry,
};
pub use reader::{LogReader, ReaderState, StateWatch};
pub use record::{
    LEVEL_FIELD, LogLevel, LogRecord, MESSAGE_FIELD, SOURCE_NAME_FIELD, TIMESTAMP_FIELD,
};
pub use record_builder::{TimestampEncoding, TimestampRange};
