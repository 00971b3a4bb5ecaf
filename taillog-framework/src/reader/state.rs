use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::{
    sync::atomic::{AtomicU8, Ordering},
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReaderState {
    Preparing,
    Starting,
    StartingWhenPaused,
    ReadingLogs,
    Paused,
    Stopped,
    DataSourceError,
    UnclassifiedError,
    Disposed,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReaderState::Preparing,
            1 => ReaderState::Starting,
            2 => ReaderState::StartingWhenPaused,
            3 => ReaderState::ReadingLogs,
            4 => ReaderState::Paused,
            5 => ReaderState::Stopped,
            6 => ReaderState::DataSourceError,
            7 => ReaderState::UnclassifiedError,
            _ => ReaderState::Disposed,
        }
    }

    /// opening a reader, paused or not
    pub fn is_starting(&self) -> bool {
        matches!(self, ReaderState::Starting | ReaderState::StartingWhenPaused)
    }

    /// a reader is open, paused or not
    pub fn is_reading(&self) -> bool {
        matches!(self, ReaderState::ReadingLogs | ReaderState::Paused)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, ReaderState::StartingWhenPaused | ReaderState::Paused)
    }

    /// records read in any other state are dropped
    pub fn can_add_logs(&self) -> bool {
        matches!(self, ReaderState::Starting | ReaderState::ReadingLogs)
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ReaderState::DataSourceError | ReaderState::UnclassifiedError
        )
    }
}

/// Atomic reader state. Transitions are serialized so watchers observe them
/// in the order they happened.
pub(crate) struct StateCell {
    name: String,
    state: AtomicU8,
    watchers: Mutex<Vec<Sender<ReaderState>>>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            state: AtomicU8::new(ReaderState::Preparing as u8),
            watchers: Mutex::new(Vec::new()),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Compare-and-set `from` to `to`, returning the state after the call: `to`
    /// on success, the current state otherwise.
    pub(crate) fn transition(&self, from: ReaderState, to: ReaderState) -> ReaderState {
        self.update(|state| (state == from).then_some(to))
    }

    /// Apply `next` to the current state until it sticks. `next` returns `None`
    /// to leave the state alone. Returns the state after the call.
    pub(crate) fn update(&self, next: impl Fn(ReaderState) -> Option<ReaderState>) -> ReaderState {
        let mut watchers = self.watchers.lock();
        let mut current = self.get();
        loop {
            let Some(to) = next(current) else {
                return current;
            };
            if to == current {
                return current;
            }
            match self.state.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.announce(&mut watchers, current, to);
                    return to;
                }
                Err(actual) => current = ReaderState::from_u8(actual),
            }
        }
    }

    /// move to `Disposed` from anywhere, returning the previous state or `None`
    /// if already disposed
    pub(crate) fn dispose(&self) -> Option<ReaderState> {
        let mut watchers = self.watchers.lock();
        let previous = ReaderState::from_u8(
            self.state
                .swap(ReaderState::Disposed as u8, Ordering::AcqRel),
        );
        if previous == ReaderState::Disposed {
            return None;
        }
        self.announce(&mut watchers, previous, ReaderState::Disposed);
        Some(previous)
    }

    fn announce(&self, watchers: &mut Vec<Sender<ReaderState>>, from: ReaderState, to: ReaderState) {
        debug!("{}: change state from {:?} to {:?}", self.name, from, to);
        watchers.retain(|watcher| watcher.send(to).is_ok());
        self.changed.notify_all();
    }

    pub(crate) fn wait_for(&self, target: ReaderState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut watchers = self.watchers.lock();
        while self.get() != target {
            if self.changed.wait_until(&mut watchers, deadline).timed_out() {
                return self.get() == target;
            }
        }
        true
    }

    pub(crate) fn watch(&self) -> StateWatch {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut watchers = self.watchers.lock();
        watchers.push(sender);
        StateWatch {
            receiver,
            current: self.get(),
        }
    }
}

/// Ordered stream of the state transitions of one reader, starting from the
/// state at the time it was created.
pub struct StateWatch {
    receiver: Receiver<ReaderState>,
    current: ReaderState,
}

impl StateWatch {
    /// last state observed through this watch
    pub fn current(&self) -> ReaderState {
        self.current
    }

    /// next transition, `None` on timeout or when the reader is gone
    pub fn next(&mut self, timeout: Duration) -> Option<ReaderState> {
        let state = self.receiver.recv_timeout(timeout).ok()?;
        self.current = state;
        Some(state)
    }

    /// Consume transitions until `target` is observed. Returns immediately if
    /// the last observed state already is `target`.
    pub fn wait_for(&mut self, target: ReaderState, timeout: Duration) -> bool {
        if self.current == target {
            return true;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.receiver.recv_deadline(deadline) {
                Ok(state) => {
                    self.current = state;
                    if state == target {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}
