//! Double-buffered line prefetching.
//!
//! Two fixed-capacity buffers alternate roles: the consumer drains the active
//! one while a fill of the other is requested from the source's fill thread
//! as soon as only half of the active buffer is left.
//!
//! ```text
//!            ┌───────── fill (line-fill thread) ─────────┐
//!            v                                           │
//!   [ A: l0 l1 l2 l3 ]  <── read_line()             underlying
//!   [ B: .. filling  ]  <── requested at N/2 left    LineRead
//! ```
//!
//! Each buffer has at most one fill in flight and is handed over through its
//! `ready` flag, so no buffer is ever written and read at the same time. Every
//! source owns its fill thread, so an idle stream only ever blocks itself.

use crate::{
    error::ReaderError,
    provider::{AbortHandle, LineRead},
};
use crossbeam_channel::Sender;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

/// why [`DualBufferLineSource::read_line`] stopped returning lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    /// the underlying stream failed, lines read before the failure were delivered
    ReadFailed(String),
    Disposed,
}

#[derive(Default)]
struct Slot {
    lines: Vec<String>,
    end: Option<EndReason>,
}

struct Buffer {
    slot: Mutex<Slot>,
    filled: Condvar,
    ready: AtomicBool,
    requested: AtomicBool,
}

impl Buffer {
    fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                lines: Vec::with_capacity(capacity),
                end: None,
            }),
            filled: Condvar::new(),
            ready: AtomicBool::new(false),
            requested: AtomicBool::new(false),
        }
    }
}

struct Shared {
    buffers: [Buffer; 2],
    reader: Mutex<Option<Box<dyn LineRead>>>,
    abort: Option<AbortHandle>,
    capacity: usize,
    exhausted: AtomicBool,
}

/// Prefetches lines of a [`LineRead`] on a background thread.
///
/// Once `read_line` returned `None` every later call returns `None` too.
pub struct DualBufferLineSource {
    shared: Arc<Shared>,
    fills: Sender<usize>,
    active: usize,
    cursor: usize,
    end: Option<EndReason>,
}

impl DualBufferLineSource {
    /// takes ownership of `reader` and requests the first fill immediately
    pub fn new(reader: Box<dyn LineRead>, capacity: usize) -> Result<Self, ReaderError> {
        Self::with_name(reader, capacity, "line-fill")
    }

    /// like [`new`](Self::new), `name` is given to the fill thread
    pub fn with_name(
        reader: Box<dyn LineRead>,
        capacity: usize,
        name: &str,
    ) -> Result<Self, ReaderError> {
        if capacity < 2 {
            return Err(ReaderError::InvalidArgument(format!(
                "line buffer capacity must be at least 2, got {}",
                capacity
            )));
        }
        let shared = Arc::new(Shared {
            buffers: [Buffer::new(capacity), Buffer::new(capacity)],
            abort: reader.abort_handle(),
            reader: Mutex::new(Some(reader)),
            capacity,
            exhausted: AtomicBool::new(false),
        });

        let (fills, requests) = crossbeam_channel::unbounded::<usize>();
        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // ends once the source and its request sender are dropped
                for index in requests {
                    fill(&worker, index);
                }
                debug!("Line fill thread exits");
            })?;

        let source = Self {
            shared,
            fills,
            active: 0,
            cursor: 0,
            end: None,
        };
        source.schedule_fill(0);
        Ok(source)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// handle to dispose the source from another thread
    pub fn handle(&self) -> LineSourceHandle {
        LineSourceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// set once `read_line` returned `None`
    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end.as_ref()
    }

    /// whether the next `read_line` returns without waiting for a fill
    pub fn has_buffered_line(&self) -> bool {
        if self.end.is_some() {
            return true;
        }
        let buffer = &self.shared.buffers[self.active];
        if !buffer.ready.load(Ordering::Acquire) {
            return false;
        }
        let slot = buffer.slot.lock();
        self.cursor < slot.lines.len() || slot.end.is_some()
    }

    /// Next line, blocking until it is available; `None` once the stream ended
    /// or the source was disposed.
    pub fn read_line(&mut self) -> Option<String> {
        if self.end.is_some() {
            return None;
        }
        let shared = Arc::clone(&self.shared);
        loop {
            let buffer = &shared.buffers[self.active];
            let mut slot = buffer.slot.lock();
            while !buffer.ready.load(Ordering::Acquire) {
                if shared.exhausted.load(Ordering::Acquire) {
                    break;
                }
                buffer.filled.wait(&mut slot);
            }
            if shared.exhausted.load(Ordering::Acquire) {
                self.end = Some(EndReason::Disposed);
                return None;
            }

            if self.cursor < slot.lines.len() {
                let line = mem::take(&mut slot.lines[self.cursor]);
                self.cursor += 1;
                let read_ahead =
                    slot.end.is_none() && slot.lines.len() - self.cursor == shared.capacity / 2;
                drop(slot);
                if read_ahead {
                    self.schedule_fill(1 - self.active);
                }
                return Some(line);
            }

            if let Some(end) = slot.end.clone() {
                self.end = Some(end);
                return None;
            }

            // drained, hand the buffer back and move to the other one
            slot.lines.clear();
            buffer.ready.store(false, Ordering::Release);
            buffer.requested.store(false, Ordering::Release);
            drop(slot);
            self.active = 1 - self.active;
            self.cursor = 0;
            self.schedule_fill(self.active);
        }
    }

    pub fn dispose(&self) {
        dispose(&self.shared);
    }

    fn schedule_fill(&self, index: usize) {
        let buffer = &self.shared.buffers[index];
        if buffer
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if self.fills.send(index).is_err() {
            warn!("Line fill thread is gone");
            let mut slot = buffer.slot.lock();
            slot.end = Some(EndReason::ReadFailed("line fill thread is gone".to_string()));
            buffer.ready.store(true, Ordering::Release);
            buffer.filled.notify_all();
        }
    }
}

impl Drop for DualBufferLineSource {
    fn drop(&mut self) {
        dispose(&self.shared);
    }
}

/// disposes a [`DualBufferLineSource`] owned by another thread
#[derive(Clone)]
pub struct LineSourceHandle {
    shared: Arc<Shared>,
}

impl LineSourceHandle {
    pub fn dispose(&self) {
        dispose(&self.shared);
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.exhausted.load(Ordering::Acquire)
    }
}

fn dispose(shared: &Shared) {
    if shared.exhausted.swap(true, Ordering::AcqRel) {
        return;
    }
    for buffer in &shared.buffers {
        let _slot = buffer.slot.lock();
        buffer.filled.notify_all();
    }
    if let Some(abort) = &shared.abort {
        abort();
    }
    // a fill in progress releases the stream when it returns
    if let Some(mut reader) = shared.reader.try_lock() {
        reader.take();
    }
}

fn fill(shared: &Shared, index: usize) {
    let mut lines = Vec::with_capacity(shared.capacity);
    let result = panic::catch_unwind(AssertUnwindSafe(|| read_lines(shared, &mut lines)));
    let end = match result {
        Ok(end) => end,
        Err(_) => {
            warn!("Line reader panicked while filling buffer");
            Some(EndReason::ReadFailed("line reader panicked".to_string()))
        }
    };

    let buffer = &shared.buffers[index];
    let mut slot = buffer.slot.lock();
    slot.lines = lines;
    slot.end = end;
    buffer.ready.store(true, Ordering::Release);
    buffer.filled.notify_all();
}

fn read_lines(shared: &Shared, lines: &mut Vec<String>) -> Option<EndReason> {
    let mut reader = shared.reader.lock();
    let mut end = None;
    match reader.as_mut() {
        None => end = Some(EndReason::Disposed),
        Some(stream) => {
            while lines.len() < shared.capacity {
                if shared.exhausted.load(Ordering::Acquire) {
                    end = Some(EndReason::Disposed);
                    break;
                }
                match stream.read_line() {
                    Ok(Some(line)) => lines.push(line),
                    Ok(None) => {
                        end = Some(EndReason::Eof);
                        break;
                    }
                    Err(err) => {
                        warn!("Failed to read line in background: {}", err);
                        end = Some(EndReason::ReadFailed(err.to_string()));
                        break;
                    }
                }
            }
        }
    }
    if shared.exhausted.load(Ordering::Acquire) {
        reader.take();
    }
    end
}
