use std::collections::HashMap;

/// named capture values accumulated over all lines of one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFieldSet {
    values: HashMap<String, String>,
    first_line: Option<u64>,
}

impl ParsedFieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// overwrite the value of a field
    pub fn set(&mut self, name: &str, value: &str) {
        match self.values.get_mut(name) {
            Some(existing) => {
                existing.clear();
                existing.push_str(value);
            }
            None => {
                self.values.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// append a value to a field on a new line
    pub fn append_line(&mut self, name: &str, value: &str) {
        match self.values.get_mut(name) {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => {
                self.values.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 1-based number of the first raw line of the record
    pub fn first_line(&self) -> Option<u64> {
        self.first_line
    }

    pub(crate) fn set_first_line(&mut self, line_number: u64) {
        self.first_line = Some(line_number);
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.first_line = None;
    }
}

impl IntoIterator for ParsedFieldSet {
    type Item = (String, String);
    type IntoIter = std::collections::hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
