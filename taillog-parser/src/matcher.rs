use crate::{LogPattern, ParsedFieldSet};
use regex::Captures;
use std::{mem, sync::Arc};

/// Sequential multi-line record matcher.
///
/// Feed raw lines with [`push_line`](Self::push_line); a [`ParsedFieldSet`] is returned
/// each time a line completes the pattern sequence. Call [`finish`](Self::finish) at end of
/// stream to complete a record whose remaining patterns are all optional.
///
/// Rules applied to each line against the current pattern `i`:
///
/// 1. match: merge captures (append for repeatable patterns), stay on `i` if repeatable,
///    otherwise move to `i + 1`; passing the last pattern completes the record
/// 2. no match while `i` is optional (repeatable or skippable): if one of the following
///    patterns, reachable through optional patterns only, matches, jump to it and retry
/// 3. no match and every pattern from `i` on is optional: complete the pending record and
///    retry the line at pattern 0
/// 4. no match and `i` is skippable: drop the line
/// 5. otherwise: drop the pending record and retry the line at pattern 0
pub struct PatternMatcher {
    patterns: Arc<[LogPattern]>,
    index: usize,
    fields: ParsedFieldSet,
    record_lines: usize,
    line_number: u64,
    completed_records: u64,
    dropped_records: u64,
}

impl PatternMatcher {
    pub fn new(patterns: impl Into<Arc<[LogPattern]>>) -> Self {
        Self {
            patterns: patterns.into(),
            index: 0,
            fields: ParsedFieldSet::new(),
            record_lines: 0,
            line_number: 0,
            completed_records: 0,
            dropped_records: 0,
        }
    }

    pub fn patterns(&self) -> &[LogPattern] {
        &self.patterns
    }

    /// index of the pattern the next line is tried against first
    pub fn pattern_index(&self) -> usize {
        self.index
    }

    pub fn lines_read(&self) -> u64 {
        self.line_number
    }

    pub fn completed_records(&self) -> u64 {
        self.completed_records
    }

    /// records abandoned because of an unexpected line
    pub fn dropped_records(&self) -> u64 {
        self.dropped_records
    }

    /// consume one raw line, returning a record if the line completed one
    pub fn push_line(&mut self, line: &str) -> Option<ParsedFieldSet> {
        self.line_number += 1;
        if self.patterns.is_empty() {
            return None;
        }
        let patterns = Arc::clone(&self.patterns);
        let mut completed = None;
        loop {
            let pattern = &patterns[self.index];

            if let Some(captures) = pattern.regex().captures(line) {
                if self.record_lines == 0 {
                    self.fields.set_first_line(self.line_number);
                }
                self.record_lines += 1;
                self.merge(pattern, &captures);
                if pattern.is_repeatable() {
                    return completed;
                }
                self.index += 1;
                if self.index == patterns.len() {
                    return completed.or_else(|| Some(self.complete()));
                }
                return completed;
            }

            if pattern.is_optional()
                && let Some(target) = self.fallthrough_target(line)
            {
                self.index = target;
                continue;
            }

            if self.record_lines > 0 && self.rest_is_optional() {
                // trailing optional section ended, the line may start the next record
                completed = Some(self.complete());
                continue;
            }

            if pattern.is_skippable() {
                return completed;
            }

            if self.index == 0 {
                self.drop_record();
                log::trace!("Line {} cannot start a record", self.line_number);
                return completed;
            }

            log::trace!(
                "Line {} cannot be matched by pattern '{}', drop record",
                self.line_number,
                pattern
            );
            self.drop_record();
        }
    }

    /// complete the pending record at end of stream if nothing mandatory is missing
    pub fn finish(&mut self) -> Option<ParsedFieldSet> {
        if self.record_lines > 0 && self.rest_is_optional() {
            return Some(self.complete());
        }
        self.drop_record();
        None
    }

    /// forget the pending record without counting it as dropped
    pub fn reset(&mut self) {
        self.index = 0;
        self.record_lines = 0;
        self.fields.clear();
    }

    fn merge(&mut self, pattern: &LogPattern, captures: &Captures) {
        for name in pattern.field_names() {
            if let Some(value) = captures.name(name) {
                let value = value.as_str().trim_end();
                if pattern.is_repeatable() {
                    self.fields.append_line(name, value);
                } else {
                    self.fields.set(name, value);
                }
            }
        }
    }

    fn fallthrough_target(&self, line: &str) -> Option<usize> {
        for (offset, pattern) in self.patterns[self.index + 1..].iter().enumerate() {
            if pattern.is_match(line) {
                return Some(self.index + 1 + offset);
            }
            if !pattern.is_optional() {
                break;
            }
        }
        None
    }

    fn rest_is_optional(&self) -> bool {
        self.patterns[self.index..].iter().all(LogPattern::is_optional)
    }

    fn complete(&mut self) -> ParsedFieldSet {
        self.index = 0;
        self.record_lines = 0;
        self.completed_records += 1;
        mem::take(&mut self.fields)
    }

    fn drop_record(&mut self) {
        if self.record_lines > 0 {
            self.dropped_records += 1;
        }
        self.reset();
    }
}
