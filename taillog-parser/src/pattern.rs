use regex::Regex;
use std::fmt;

/// one line-matching rule of a log record
#[derive(Debug, Clone)]
pub struct LogPattern {
    regex: Regex,
    is_repeatable: bool,
    is_skippable: bool,
    description: Option<String>,
    field_names: Vec<String>,
}

impl LogPattern {
    /// `is_repeatable`: the pattern may match zero or more consecutive lines.
    /// `is_skippable`: lines failing this pattern are dropped instead of breaking the record.
    pub fn new(regex: Regex, is_repeatable: bool, is_skippable: bool) -> Self {
        let field_names = regex
            .capture_names()
            .flatten()
            .map(|name| name.to_string())
            .collect();
        Self {
            regex,
            is_repeatable,
            is_skippable,
            description: None,
            field_names,
        }
    }

    pub fn parse(
        pattern: &str,
        is_repeatable: bool,
        is_skippable: bool,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(Regex::new(pattern)?, is_repeatable, is_skippable))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_repeatable(&self) -> bool {
        self.is_repeatable
    }

    pub fn is_skippable(&self) -> bool {
        self.is_skippable
    }

    /// whether a record may be completed without this pattern consuming another line
    pub fn is_optional(&self) -> bool {
        self.is_repeatable || self.is_skippable
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// names of the capture groups defined by the pattern
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

impl fmt::Display for LogPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.regex.as_str())?;
        if self.is_repeatable {
            write!(f, " (R)")?;
        }
        if self.is_skippable {
            write!(f, " (S)")?;
        }
        Ok(())
    }
}
