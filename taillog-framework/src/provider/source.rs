use super::{AbortHandle, LineRead, LogProvider, OpenError, Preparation};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

static NEXT_SOURCE_ID: AtomicUsize = AtomicUsize::new(1);

/// granularity of cancellation checks while waiting for the source
const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceState {
    Preparing,
    ReadyToOpenReader,
    OpeningReader,
    ReaderOpened,
    ClosingReader,
    SourceNotFound,
    ExternalDependencyNotFound,
    UnclassifiedError,
    Disposed,
}

impl DataSourceState {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DataSourceState::SourceNotFound
                | DataSourceState::ExternalDependencyNotFound
                | DataSourceState::UnclassifiedError
        )
    }
}

/// A provider plus the state machine shared by every reader built over it.
///
/// At most one reader is open at a time; [`open_reader`](Self::open_reader)
/// waits for the previous one to be closed.
pub struct LogDataSource {
    name: String,
    provider: Mutex<Box<dyn LogProvider>>,
    state: Mutex<DataSourceState>,
    state_changed: Condvar,
    file_name: Option<Arc<str>>,
}

impl LogDataSource {
    pub fn new(provider: impl LogProvider + 'static) -> Arc<Self> {
        Self::from_boxed(Box::new(provider))
    }

    pub fn from_boxed(provider: Box<dyn LogProvider>) -> Arc<Self> {
        let id = NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            name: format!("{}-{}", provider.kind(), id),
            file_name: provider.file_name().map(Arc::from),
            provider: Mutex::new(provider),
            state: Mutex::new(DataSourceState::Preparing),
            state_changed: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DataSourceState {
        *self.state.lock()
    }

    pub fn file_name(&self) -> Option<Arc<str>> {
        self.file_name.clone()
    }

    /// prepare the provider if not done yet, returning the resulting state
    pub fn prepare(&self) -> DataSourceState {
        let mut state = self.state.lock();
        if *state == DataSourceState::Preparing {
            let preparation = self.provider.lock().prepare();
            let next = match preparation {
                Preparation::Ready => DataSourceState::ReadyToOpenReader,
                Preparation::NotFound(reason) => {
                    error!("{}: source not found: {}", self.name, reason);
                    DataSourceState::SourceNotFound
                }
                Preparation::DependencyNotFound(reason) => {
                    error!("{}: external dependency not found: {}", self.name, reason);
                    DataSourceState::ExternalDependencyNotFound
                }
                Preparation::Error(reason) => {
                    error!("{}: unable to prepare: {}", self.name, reason);
                    DataSourceState::UnclassifiedError
                }
            };
            self.set_state(&mut state, next);
        }
        *state
    }

    /// Open a line stream, waiting at most `timeout` for another reader to close.
    ///
    /// Open failures move the source into its sticky error state.
    pub fn open_reader(
        self: &Arc<Self>,
        timeout: Duration,
        cancelled: &AtomicBool,
    ) -> Result<SourceReader, OpenError> {
        self.prepare();
        let deadline = Instant::now() + timeout;
        {
            let mut state = self.state.lock();
            loop {
                if cancelled.load(Ordering::Acquire) {
                    return Err(OpenError::Cancelled);
                }
                match *state {
                    DataSourceState::ReadyToOpenReader => {
                        self.set_state(&mut state, DataSourceState::OpeningReader);
                        break;
                    }
                    DataSourceState::OpeningReader
                    | DataSourceState::ReaderOpened
                    | DataSourceState::ClosingReader => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(OpenError::Timeout);
                        }
                        let wait = (deadline - now).min(WAIT_SLICE);
                        self.state_changed.wait_for(&mut state, wait);
                    }
                    other => return Err(OpenError::Unavailable(other)),
                }
            }
        }

        let result = self.provider.lock().open(cancelled);
        let mut state = self.state.lock();
        match result {
            Ok(_) if cancelled.load(Ordering::Acquire) => {
                self.abandon_open(&mut state);
                Err(OpenError::Cancelled)
            }
            Ok(inner) if *state == DataSourceState::OpeningReader => {
                self.set_state(&mut state, DataSourceState::ReaderOpened);
                Ok(SourceReader {
                    inner,
                    source: Arc::clone(self),
                })
            }
            Ok(_) => Err(OpenError::Unavailable(*state)),
            Err(OpenError::Cancelled) => {
                self.abandon_open(&mut state);
                Err(OpenError::Cancelled)
            }
            Err(err) => {
                error!("{}: unable to open reader: {}", self.name, err);
                if *state == DataSourceState::OpeningReader {
                    let next = match &err {
                        OpenError::NotFound(_) => DataSourceState::SourceNotFound,
                        OpenError::DependencyNotFound(_) => {
                            DataSourceState::ExternalDependencyNotFound
                        }
                        _ => DataSourceState::UnclassifiedError,
                    };
                    self.set_state(&mut state, next);
                }
                Err(err)
            }
        }
    }

    /// an abandoned open leaves the source usable for the next reader
    fn abandon_open(&self, state: &mut DataSourceState) {
        debug!("{}: opening reader cancelled", self.name);
        if *state == DataSourceState::OpeningReader {
            self.set_state(state, DataSourceState::ReadyToOpenReader);
        }
    }

    /// idempotent; an open reader keeps working until it is dropped
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if *state != DataSourceState::Disposed {
            self.set_state(&mut state, DataSourceState::Disposed);
        }
    }

    fn reader_closed(&self) {
        let mut state = self.state.lock();
        if *state == DataSourceState::ReaderOpened {
            self.set_state(&mut state, DataSourceState::ClosingReader);
            self.set_state(&mut state, DataSourceState::ReadyToOpenReader);
        }
    }

    fn set_state(&self, state: &mut DataSourceState, next: DataSourceState) {
        debug!("{}: change state from {:?} to {:?}", self.name, *state, next);
        *state = next;
        self.state_changed.notify_all();
    }
}

/// line stream handed out by [`LogDataSource::open_reader`]; dropping it
/// makes the source ready for the next reader
pub struct SourceReader {
    inner: Box<dyn LineRead>,
    source: Arc<LogDataSource>,
}

impl LineRead for SourceReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.inner.read_line()
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        self.inner.abort_handle()
    }
}

impl Drop for SourceReader {
    fn drop(&mut self) {
        self.source.reader_closed();
    }
}
