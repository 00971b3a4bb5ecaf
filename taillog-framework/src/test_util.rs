//! Shared fixtures for unit tests.

use crate::provider::{BufLineReader, LineRead, LogProvider, OpenError, Preparation};
use lazy_static::lazy_static;
use rand::{Rng, distr::Alphanumeric};
use std::{
    io::{self, Cursor},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};
use taillog_parser::LogPattern;

lazy_static! {
    pub(crate) static ref RECORD_PATTERNS: Vec<LogPattern> = vec![
        LogPattern::parse(
            r"^(?<Timestamp>[^\s]+[\s]+[^\s]+)[\s]+(?<Level>[^\s]+)[\s]+(?<SourceName>[^\s]+)\:[\s]*(?<Message>.*)$",
            false,
            false,
        )
        .unwrap(),
        LogPattern::parse(r"^[\s]{2}(?<Message>[^\[]*)$", true, false).unwrap(),
        LogPattern::parse(r"^[\s]{2}\[TAIL\]$", false, false).unwrap(),
    ];
}

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M-%S%.3f";

fn random_word(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

/// `record_count` records of 3 to 6 lines, `(Invalid)` lines randomly around them
pub(crate) fn generate_lines(record_count: usize, rng: &mut impl Rng) -> Vec<String> {
    let mut lines = Vec::new();
    if rng.random_bool(0.5) {
        lines.push("(Invalid)".to_string());
    }
    for index in 0..record_count {
        let level = ["V", "D", "I", "W", "E", "F"][rng.random_range(0..6)];
        lines.push(format!(
            "2024-05-06 10-11-12.{:03} {} {}: #{}",
            index % 1000,
            level,
            random_word(rng, 6),
            index
        ));
        for _ in 0..rng.random_range(1..5) {
            lines.push(format!("  {}", random_word(rng, 12)));
        }
        lines.push("  [TAIL]".to_string());
        if rng.random_bool(0.5) {
            lines.push("(Invalid)".to_string());
        }
    }
    lines
}

/// in-memory provider counting how often it is touched
pub(crate) struct CountingProvider {
    pub lines: Vec<String>,
    pub missing: bool,
    pub prepare_calls: Arc<AtomicUsize>,
    pub open_calls: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub(crate) fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            missing: false,
            prepare_calls: Arc::new(AtomicUsize::new(0)),
            open_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn missing() -> Self {
        Self {
            missing: true,
            ..Self::new(Vec::new())
        }
    }
}

impl LogProvider for CountingProvider {
    fn kind(&self) -> &'static str {
        "counting"
    }

    fn prepare(&mut self) -> Preparation {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            Preparation::NotFound("Invalid".to_string())
        } else {
            Preparation::Ready
        }
    }

    fn open(&mut self, _cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let text = self.lines.join("\n");
        Ok(Box::new(BufLineReader::new(Cursor::new(text.into_bytes()))))
    }
}

/// stream that never ends, repeating one record
pub(crate) struct EndlessLines {
    pub count: u64,
}

impl LineRead for EndlessLines {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.count += 1;
        Ok(Some(match self.count % 3 {
            1 => format!("2024-05-06 10-11-12.000 I endless: #{}", self.count),
            2 => "  body".to_string(),
            _ => "  [TAIL]".to_string(),
        }))
    }
}

pub(crate) struct EndlessProvider;

impl LogProvider for EndlessProvider {
    fn kind(&self) -> &'static str {
        "endless"
    }

    fn prepare(&mut self) -> Preparation {
        Preparation::Ready
    }

    fn open(&mut self, _cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        Ok(Box::new(EndlessLines { count: 0 }))
    }
}

/// open waits like a listener for its first client until `release` is set
pub(crate) struct WaitingProvider {
    pub lines: Vec<String>,
    pub release: Arc<AtomicBool>,
}

impl WaitingProvider {
    pub(crate) fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            release: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl LogProvider for WaitingProvider {
    fn kind(&self) -> &'static str {
        "waiting"
    }

    fn prepare(&mut self) -> Preparation {
        Preparation::Ready
    }

    fn open(&mut self, cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        while !self.release.load(Ordering::Acquire) {
            if cancelled.load(Ordering::Acquire) {
                return Err(OpenError::Cancelled);
            }
            thread::sleep(Duration::from_millis(10));
        }
        let text = self.lines.join("\n");
        Ok(Box::new(BufLineReader::new(Cursor::new(text.into_bytes()))))
    }
}
