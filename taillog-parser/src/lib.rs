//! # taillog-parser
//!
//! Groups raw log lines into records using an ordered list of line patterns.
//!
//! A log record is exactly one walk through the whole pattern list:
//!
//! ```text
//!  line ──> patterns[i] ──match──> merge named captures ──> stay (repeatable) / i + 1
//!                │
//!                └─no match──> fall through to a later pattern
//!                              │ complete the record if only optional patterns remain
//!                              │ drop the line (skippable)
//!                              └ reset and retry the line at pattern 0
//! ```
//!
//! The matcher never fails: lines that do not fit the grammar are absorbed and
//! a noisy stream simply yields fewer records.
//!
//! ```rust
//! use taillog_parser::{LogPattern, PatternMatcher};
//!
//! let patterns = vec![
//!     LogPattern::parse(r"^(?<Level>[A-Z]) (?<Message>.*)$", false, false).unwrap(),
//!     LogPattern::parse(r"^  (?<Message>[^\[].*)$", true, true).unwrap(),
//!     LogPattern::parse(r"^  \[TAIL\]$", false, false).unwrap(),
//! ];
//! let mut matcher = PatternMatcher::new(patterns);
//! assert!(matcher.push_line("I started").is_none());
//! assert!(matcher.push_line("  more text").is_none());
//! let record = matcher.push_line("  [TAIL]").unwrap();
//! assert_eq!(record.get("Message"), Some("started\nmore text"));
//! ```

mod fields;
mod matcher;
mod pattern;

pub use fields::ParsedFieldSet;
pub use matcher::PatternMatcher;
pub use pattern::LogPattern;
