//! Shared fixtures for unit tests.

use lazy_static::lazy_static;
use rand::{Rng, distr::Alphanumeric};
use regex::Regex;
use std::collections::HashMap;
use taillog_framework::{LogLevel, ReaderDesc};
use taillog_parser::LogPattern;

lazy_static! {
    static ref HEADER_REGEX: Regex = Regex::new(
        r"^(?<Timestamp>[^\s]+[\s]+[^\s]+)[\s]+(?<Level>[^\s]+)[\s]+(?<SourceName>[^\s]+)\:[\s]*(?<Message>.*)$"
    )
    .unwrap();
    pub(crate) static ref RECORD_PATTERNS: Vec<LogPattern> = vec![
        LogPattern::new(HEADER_REGEX.clone(), false, false),
        LogPattern::parse(r"^[\s]{2}(?<Message>[^\[]*)$", true, false).unwrap(),
        LogPattern::parse(r"^[\s]{2}\[TAIL\]$", false, false).unwrap(),
    ];
}

fn random_word(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

/// `record_count` records numbered `#0..`, `(Invalid)` lines randomly around them
pub(crate) fn generate_lines(record_count: usize, rng: &mut impl Rng) -> Vec<String> {
    let mut lines = Vec::new();
    if rng.random_bool(0.5) {
        lines.push("(Invalid)".to_string());
    }
    for index in 0..record_count {
        lines.push(format!(
            "2024-05-06 10-11-12.{:03} {} {}: #{}",
            index % 1000,
            ["D", "I", "W", "E"][rng.random_range(0..4)],
            random_word(rng, 6),
            index
        ));
        for _ in 0..rng.random_range(1..5) {
            lines.push(format!("  {}", random_word(rng, 16)));
        }
        lines.push("  [TAIL]".to_string());
        if rng.random_bool(0.5) {
            lines.push("(Invalid)".to_string());
        }
    }
    lines
}

pub(crate) fn reader_desc() -> ReaderDesc {
    let mut desc = ReaderDesc::new(RECORD_PATTERNS.clone());
    desc.timestamp_formats = vec!["%Y-%m-%d %H-%M-%S%.3f".to_string()];
    desc.level_map = HashMap::from([
        ("D".to_string(), LogLevel::Debug),
        ("I".to_string(), LogLevel::Info),
        ("W".to_string(), LogLevel::Warn),
        ("E".to_string(), LogLevel::Error),
    ]);
    desc
}
