use anyhow::Result;
use std::{
    io,
    sync::{Arc, atomic::AtomicBool},
};
use taillog_framework::{LineRead, LogProvider, OpenError, Preparation, SourceOptions};

/// serves a fixed list of lines, every open starts from the first one
pub struct MemoryProvider {
    lines: Arc<[String]>,
}

impl MemoryProvider {
    pub fn new(lines: impl Into<Arc<[String]>>) -> Self {
        Self {
            lines: lines.into(),
        }
    }

    pub fn from_options(options: &SourceOptions) -> Result<Self> {
        Ok(Self::new(options.lines.clone()))
    }
}

struct MemoryLines {
    lines: Arc<[String]>,
    next: usize,
}

impl LineRead for MemoryLines {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let line = self.lines.get(self.next).cloned();
        if line.is_some() {
            self.next += 1;
        }
        Ok(line)
    }
}

impl LogProvider for MemoryProvider {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn prepare(&mut self) -> Preparation {
        Preparation::Ready
    }

    fn open(&mut self, _cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        Ok(Box::new(MemoryLines {
            lines: Arc::clone(&self.lines),
            next: 0,
        }))
    }
}
