use crate::record::LogRecord;
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Default)]
struct Records {
    items: VecDeque<Arc<LogRecord>>,
    closed: bool,
}

#[derive(Default)]
struct Inner {
    records: RwLock<Records>,
    version: Mutex<u64>,
    changed: Condvar,
    max_count: Option<usize>,
    drop_count: usize,
}

/// Ordered collection of parsed records shared between the reading thread and
/// any number of observers. Cloning is cheap and shares the records.
#[derive(Clone, Default)]
pub struct LogList {
    inner: Arc<Inner>,
}

impl LogList {
    pub fn new() -> Self {
        Self::default()
    }

    /// keeps at most `max_count` records; when full, at least `drop_count` of
    /// the oldest are removed at once
    pub fn with_limit(max_count: Option<usize>, drop_count: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_count,
                drop_count,
                ..Default::default()
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.records.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Arc<LogRecord>> {
        self.inner.records.read().items.get(index).cloned()
    }

    pub fn last(&self) -> Option<Arc<LogRecord>> {
        self.inner.records.read().items.back().cloned()
    }

    /// copy of `count` records from `start`, shorter if the list ends before
    pub fn range(&self, start: usize, count: usize) -> Vec<Arc<LogRecord>> {
        let records = self.inner.records.read();
        records.items.iter().skip(start).take(count).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<LogRecord>> {
        self.inner.records.read().items.iter().cloned().collect()
    }

    /// records whose id is greater than `id`, in order
    pub fn after_id(&self, id: u64) -> Vec<Arc<LogRecord>> {
        let records = self.inner.records.read();
        let start = records.items.partition_point(|record| record.id() <= id);
        records.items.range(start..).cloned().collect()
    }

    /// incremented on every change
    pub fn version(&self) -> u64 {
        *self.inner.version.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.records.read().closed
    }

    pub fn push(&self, record: LogRecord) -> bool {
        self.extend(vec![record]) == 1
    }

    /// append in order, returns how many were added (0 once closed)
    pub fn extend(&self, records: Vec<LogRecord>) -> usize {
        if records.is_empty() {
            return 0;
        }
        let added = {
            let mut list = self.inner.records.write();
            if list.closed {
                return 0;
            }
            let mut incoming = records.len();
            let mut skip = 0;
            if let Some(max_count) = self.inner.max_count {
                if incoming > max_count {
                    skip = incoming - max_count;
                    incoming = max_count;
                }
                let total = list.items.len() + incoming;
                if total > max_count {
                    let needed = total - max_count;
                    let dropped = needed.max(self.inner.drop_count).min(list.items.len());
                    list.items.drain(..dropped);
                }
            }
            list.items
                .extend(records.into_iter().skip(skip).map(Arc::new));
            incoming
        };
        self.notify();
        added
    }

    pub fn clear(&self) {
        self.inner.records.write().items.clear();
        self.notify();
    }

    /// reject every later append
    pub fn close(&self) {
        self.inner.records.write().closed = true;
        self.notify();
    }

    /// Wait until the length differs from `known_len` or `timeout` elapses,
    /// returning the length at that point.
    pub fn wait_for_count_change(&self, known_len: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut version = self.inner.version.lock();
        loop {
            let len = self.len();
            if len != known_len {
                return len;
            }
            if self
                .inner
                .changed
                .wait_until(&mut version, deadline)
                .timed_out()
            {
                return self.len();
            }
        }
    }

    /// wait until the version differs from `known_version`, returning the new version
    pub fn wait_for_change(&self, known_version: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut version = self.inner.version.lock();
        while *version == known_version {
            if self
                .inner
                .changed
                .wait_until(&mut version, deadline)
                .timed_out()
            {
                break;
            }
        }
        *version
    }

    fn notify(&self) {
        let mut version = self.inner.version.lock();
        *version += 1;
        self.inner.changed.notify_all();
    }
}
