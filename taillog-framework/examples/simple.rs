//! Simple example: a custom provider feeding multi-line records to a reader.
//!
//! Records start with a header line; indented lines belong to the message.
//!
//! Run with: cargo run --example simple

use anyhow::Result;
use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use taillog_framework::{
    BufLineReader, LineRead, LogDataSource, LogProvider, LogReader, OpenError, Preparation,
    ReaderDesc, ReaderState,
};
use taillog_parser::LogPattern;

const LOG_TEXT: &str = "\
2025-01-15 10:30:00.125 INFO  server: listening on :8080
2025-01-15 10:30:02.511 ERROR worker: job 17 failed
    at Worker.run(Worker.java:42)
    at Thread.run(Thread.java:750)
2025-01-15 10:30:03.004 WARN  server: slow request /api/items
";

// provider serving a fixed text
struct TextProvider;

impl LogProvider for TextProvider {
    fn kind(&self) -> &'static str {
        "text"
    }

    fn prepare(&mut self) -> Preparation {
        Preparation::Ready
    }

    fn open(&mut self, _cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        Ok(Box::new(BufLineReader::new(Cursor::new(LOG_TEXT))))
    }
}

fn main() -> Result<()> {
    let patterns = vec![
        LogPattern::parse(
            r"^(?<Timestamp>\S+ \S+) (?<Level>\w+)\s+(?<SourceName>\w+): (?<Message>.*)$",
            false,
            false,
        )?,
        LogPattern::parse(r"^\s+(?<Message>.*)$", true, false)?,
    ];
    let mut desc = ReaderDesc::new(patterns);
    desc.timestamp_formats = vec!["%Y-%m-%d %H:%M:%S%.3f".to_string()];

    let reader = LogReader::new(LogDataSource::new(TextProvider), desc)?;
    reader.start()?;
    reader.wait_for_state(ReaderState::Stopped, Duration::from_secs(5));

    for record in reader.logs().snapshot() {
        println!("{}", record);
    }
    Ok(())
}
