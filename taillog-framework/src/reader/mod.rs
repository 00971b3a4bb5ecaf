//! The log reader state machine.
//!
//! ```text
//! Preparing -> Starting -> ReadingLogs -> Stopped ──continuous──> Starting
//!                 │  ↑          │  ↑
//!           pause │  │ resume   │  │
//!                 ↓  │          ↓  │
//!          StartingWhenPaused -> Paused ──continuous──> StartingWhenPaused
//!
//! starting states -> DataSourceError
//! reading states -> DataSourceError | UnclassifiedError
//! (any) -> Disposed
//! ```
//!
//! Each started reader owns one thread running the open/pump loop. Completed
//! records are appended to the reader's [`LogList`] in the order their lines
//! were read. A paused reader keeps reading but drops what it reads.
//! [`LogReader::restart`] replaces the thread, so every run gets its own
//! cancellation token.

mod cancel;
mod pump;
mod state;

pub use state::{ReaderState, StateWatch};

use crate::{
    desc::ReaderDesc, error::ReaderError, line_source::LineSourceHandle, log_list::LogList,
    provider::LogDataSource,
};
use cancel::CancelToken;
use log::{debug, warn};
use parking_lot::Mutex;
use state::StateCell;
use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

static NEXT_READER_ID: AtomicUsize = AtomicUsize::new(1);

struct ReaderShared {
    name: String,
    source: Arc<LogDataSource>,
    desc: ReaderDesc,
    state: StateCell,
    logs: LogList,
    run_cancel: Mutex<Arc<CancelToken>>,
    line_source: Mutex<Option<LineSourceHandle>>,
}

/// Reads records from a [`LogDataSource`] according to a [`ReaderDesc`].
///
/// Dropping the reader disposes it. Records already read stay available
/// through [`logs`](Self::logs) after disposal.
pub struct LogReader {
    shared: Arc<ReaderShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogReader {
    pub fn new(source: Arc<LogDataSource>, desc: ReaderDesc) -> Result<Self, ReaderError> {
        desc.validate()?;
        let id = NEXT_READER_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("LogReader-{}", id);
        Ok(Self {
            shared: Arc::new(ReaderShared {
                state: StateCell::new(name.clone()),
                logs: LogList::with_limit(desc.max_log_count, desc.drop_log_count),
                name,
                source,
                desc,
                run_cancel: Mutex::new(Arc::new(CancelToken::default())),
                line_source: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ReaderState {
        self.shared.state.get()
    }

    pub fn desc(&self) -> &ReaderDesc {
        &self.shared.desc
    }

    pub fn source(&self) -> &Arc<LogDataSource> {
        &self.shared.source
    }

    pub fn is_continuous_reading(&self) -> bool {
        self.shared.desc.is_continuous_reading
    }

    /// the records read so far, shared with the reading thread
    pub fn logs(&self) -> &LogList {
        &self.shared.logs
    }

    /// subscribe to every later state transition
    pub fn watch(&self) -> StateWatch {
        self.shared.state.watch()
    }

    /// wait until the current state is `state`
    pub fn wait_for_state(&self, state: ReaderState, timeout: Duration) -> bool {
        self.shared.state.wait_for(state, timeout)
    }

    /// Start reading in the background.
    ///
    /// Legal from `Preparing`, or from `Stopped` for a continuous reader.
    pub fn start(&self) -> Result<(), ReaderError> {
        let state = self.state();
        if state == ReaderState::Disposed {
            return Err(ReaderError::Disposed);
        }
        if self.shared.desc.patterns.is_empty() {
            return Err(ReaderError::InvalidOperation(
                "no log pattern specified".to_string(),
            ));
        }
        let restartable = state == ReaderState::Preparing
            || (state == ReaderState::Stopped && self.is_continuous_reading());
        if !restartable {
            return Err(ReaderError::InvalidOperation(format!(
                "cannot start reading logs when state is {:?}",
                state
            )));
        }
        match self.shared.state.transition(state, ReaderState::Starting) {
            ReaderState::Starting => {}
            ReaderState::Disposed => return Err(ReaderError::Disposed),
            other => {
                return Err(ReaderError::InvalidOperation(format!(
                    "cannot start reading logs when state is {:?}",
                    other
                )));
            }
        }

        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            // the continuous loop picks up the new Starting state
            return Ok(());
        }
        self.spawn_worker(&mut worker)
    }

    fn spawn_worker(&self, worker: &mut Option<JoinHandle<()>>) -> Result<(), ReaderError> {
        let shared = Arc::clone(&self.shared);
        let cancel = Arc::clone(&self.shared.run_cancel.lock());
        let spawned = thread::Builder::new()
            .name(format!("{}-pump", self.shared.name))
            .spawn(move || pump::run(shared, cancel));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.state.update(|state| {
                    state.is_starting().then_some(ReaderState::UnclassifiedError)
                });
                Err(ReaderError::Spawn(err))
            }
        }
    }

    /// Drop the records read so far and read the source again from the start.
    ///
    /// Legal in every state but `Disposed`; from `Preparing` it is
    /// [`start`](Self::start). The running thread is stopped and joined first.
    pub fn restart(&self) -> Result<(), ReaderError> {
        match self.state() {
            ReaderState::Disposed => return Err(ReaderError::Disposed),
            ReaderState::Preparing => return self.start(),
            _ => {}
        }
        if self.shared.desc.patterns.is_empty() {
            return Err(ReaderError::InvalidOperation(
                "no log pattern specified".to_string(),
            ));
        }

        let mut worker = self.worker.lock();
        let previous = mem::replace(
            &mut *self.shared.run_cancel.lock(),
            Arc::new(CancelToken::default()),
        );
        previous.cancel();
        if let Some(line_source) = self.shared.line_source.lock().take() {
            line_source.dispose();
        }
        if let Some(handle) = worker.take()
            && handle.join().is_err()
        {
            warn!("{}: reading thread panicked", self.shared.name);
        }

        self.shared.logs.clear();
        let state = self
            .shared
            .state
            .update(|state| (state != ReaderState::Disposed).then_some(ReaderState::Starting));
        if state == ReaderState::Disposed {
            return Err(ReaderError::Disposed);
        }
        debug!("{}: restart reading logs", self.shared.name);
        self.spawn_worker(&mut worker)
    }

    /// Keep reading but drop new records until [`resume`](Self::resume).
    ///
    /// Only a continuous reader which is starting or reading can pause.
    /// Returns whether the reader is paused afterwards.
    pub fn pause(&self) -> bool {
        let continuous = self.is_continuous_reading();
        let state = self.shared.state.update(|state| match state {
            ReaderState::Starting if continuous => Some(ReaderState::StartingWhenPaused),
            ReaderState::ReadingLogs if continuous => Some(ReaderState::Paused),
            _ => None,
        });
        if !state.is_paused() {
            warn!("{}: cannot pause reading logs when state is {:?}", self.shared.name, state);
            return false;
        }
        true
    }

    /// Returns whether records are accepted again afterwards.
    pub fn resume(&self) -> bool {
        let state = self.shared.state.update(|state| match state {
            ReaderState::StartingWhenPaused => Some(ReaderState::Starting),
            ReaderState::Paused => Some(ReaderState::ReadingLogs),
            _ => None,
        });
        if !state.can_add_logs() {
            warn!("{}: cannot resume reading logs when state is {:?}", self.shared.name, state);
            return false;
        }
        true
    }

    /// Move to `Disposed` and stop reading; idempotent.
    ///
    /// The reading thread is not joined, it exits at its next line boundary.
    pub fn dispose(&self) {
        let Some(previous) = self.shared.state.dispose() else {
            return;
        };
        debug!("{}: dispose in state {:?}", self.shared.name, previous);
        self.shared.run_cancel.lock().cancel();
        self.shared.logs.close();
        if let Some(line_source) = self.shared.line_source.lock().take() {
            line_source.dispose();
        }
        self.worker.lock().take();
    }

    pub fn clear_logs(&self) {
        self.shared.logs.clear();
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::LogLevel,
        record_builder::PANIC_MESSAGE,
        test_util::{
            CountingProvider, EndlessProvider, RECORD_PATTERNS, TIMESTAMP_FORMAT, WaitingProvider,
            generate_lines,
        },
    };
    use std::collections::HashMap;

    const TIMEOUT: Duration = Duration::from_secs(5);
    const RECORD_COUNT: usize = 256;

    fn desc() -> ReaderDesc {
        let mut desc = ReaderDesc::new(RECORD_PATTERNS.clone());
        desc.timestamp_formats = vec![TIMESTAMP_FORMAT.to_string()];
        desc.level_map = HashMap::from([
            ("V".to_string(), LogLevel::Verbose),
            ("D".to_string(), LogLevel::Debug),
            ("I".to_string(), LogLevel::Info),
            ("W".to_string(), LogLevel::Warn),
            ("E".to_string(), LogLevel::Error),
            ("F".to_string(), LogLevel::Fatal),
        ]);
        desc
    }

    fn memory_source(lines: Vec<String>) -> Arc<LogDataSource> {
        LogDataSource::new(CountingProvider::new(lines))
    }

    fn read_to_end(reader: &LogReader) {
        reader.start().unwrap();
        assert!(reader.wait_for_state(ReaderState::Stopped, TIMEOUT));
    }

    #[test]
    fn test_reads_every_record_in_order() {
        let mut rng = rand::rng();
        for _ in 0..10 {
            let lines = generate_lines(RECORD_COUNT, &mut rng);
            let reader = LogReader::new(memory_source(lines), desc()).unwrap();
            read_to_end(&reader);
            let logs = reader.logs().snapshot();
            assert_eq!(logs.len(), RECORD_COUNT);
            for (index, record) in logs.iter().enumerate() {
                assert_eq!(record.message().unwrap().lines().next(), Some(format!("#{}", index).as_str()));
                assert!(record.timestamp().is_some());
                assert_ne!(record.level(), LogLevel::Undefined);
                assert_eq!(record.id(), index as u64 + 1);
            }
        }
    }

    #[test]
    fn test_noise_only_stream_yields_nothing() {
        let lines = vec!["(Invalid)".to_string(); 100];
        let reader = LogReader::new(memory_source(lines), desc()).unwrap();
        read_to_end(&reader);
        assert!(reader.logs().is_empty());
    }

    #[test]
    fn test_small_batches_keep_order() {
        let mut rng = rand::rng();
        let lines = generate_lines(RECORD_COUNT, &mut rng);
        let mut desc = desc();
        desc.update_chunk_size = 3;
        desc.buffer_capacity = 2;
        let reader = LogReader::new(memory_source(lines), desc).unwrap();
        read_to_end(&reader);
        let ids: Vec<_> = reader.logs().snapshot().iter().map(|r| r.id()).collect();
        assert_eq!(ids, (1..=RECORD_COUNT as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_second_start_after_stop_fails() {
        let reader = LogReader::new(memory_source(generate_lines(4, &mut rand::rng())), desc()).unwrap();
        read_to_end(&reader);
        assert!(matches!(reader.start(), Err(ReaderError::InvalidOperation(_))));
        assert_eq!(reader.state(), ReaderState::Stopped);
        assert_eq!(reader.logs().len(), 4);
    }

    #[test]
    fn test_start_while_running_fails() {
        let reader = LogReader::new(LogDataSource::new(EndlessProvider), desc()).unwrap();
        reader.start().unwrap();
        assert!(matches!(reader.start(), Err(ReaderError::InvalidOperation(_))));
    }

    #[test]
    fn test_start_without_patterns_fails() {
        let reader = LogReader::new(memory_source(Vec::new()), ReaderDesc::new(Vec::new())).unwrap();
        assert!(matches!(reader.start(), Err(ReaderError::InvalidOperation(_))));
        assert_eq!(reader.state(), ReaderState::Preparing);
    }

    #[test]
    fn test_invalid_desc_is_rejected() {
        let mut desc = desc();
        desc.buffer_capacity = 0;
        assert!(matches!(
            LogReader::new(memory_source(Vec::new()), desc),
            Err(ReaderError::InvalidArgument(_))
        ));
        let mut desc = self::desc();
        desc.max_log_count = Some(0);
        assert!(matches!(
            LogReader::new(memory_source(Vec::new()), desc),
            Err(ReaderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_data_source_error_is_sticky() {
        let provider = CountingProvider::missing();
        let prepare_calls = Arc::clone(&provider.prepare_calls);
        let open_calls = Arc::clone(&provider.open_calls);
        let source = LogDataSource::new(provider);

        let first = LogReader::new(Arc::clone(&source), desc()).unwrap();
        first.start().unwrap();
        assert!(first.wait_for_state(ReaderState::DataSourceError, TIMEOUT));

        let second = LogReader::new(Arc::clone(&source), desc()).unwrap();
        second.start().unwrap();
        assert!(second.wait_for_state(ReaderState::DataSourceError, TIMEOUT));

        assert_eq!(prepare_calls.load(Ordering::SeqCst), 1);
        assert_eq!(open_calls.load(Ordering::SeqCst), 0);
    }

    fn continuous_desc() -> ReaderDesc {
        let mut desc = desc().continuous(true);
        desc.restart_delay = Duration::ZERO;
        desc.restart_delay_when_empty = Duration::ZERO;
        desc
    }

    #[test]
    fn test_continuous_reading_cycles() {
        let mut rng = rand::rng();
        let lines = generate_lines(RECORD_COUNT, &mut rng);
        let reader = LogReader::new(memory_source(lines), continuous_desc()).unwrap();
        let mut watch = reader.watch();
        reader.start().unwrap();
        for _ in 0..50 {
            assert!(watch.wait_for(ReaderState::Starting, TIMEOUT));
            assert!(watch.wait_for(ReaderState::ReadingLogs, TIMEOUT));
            assert!(watch.wait_for(ReaderState::Starting, TIMEOUT));
        }
        reader.dispose();
        assert!(reader.logs().len() >= RECORD_COUNT * 40);
    }

    #[test]
    fn test_continuous_reader_waits_before_restart() {
        let reader = LogReader::new(memory_source(generate_lines(4, &mut rand::rng())), desc().continuous(true)).unwrap();
        assert!(!reader.desc().restart_delay.is_zero());
        let mut watch = reader.watch();
        reader.start().unwrap();
        assert!(watch.wait_for(ReaderState::Stopped, TIMEOUT));
        assert_eq!(watch.next(Duration::from_millis(300)), None);
        assert_eq!(reader.logs().len(), 4);
        assert!(watch.wait_for(ReaderState::Starting, TIMEOUT));
        reader.dispose();
    }

    #[test]
    fn test_dispose_is_final() {
        let reader = LogReader::new(LogDataSource::new(EndlessProvider), desc()).unwrap();
        reader.start().unwrap();
        assert!(reader.wait_for_state(ReaderState::ReadingLogs, TIMEOUT));
        assert!(reader.logs().wait_for_count_change(0, TIMEOUT) > 0);
        reader.dispose();
        reader.dispose();
        assert_eq!(reader.state(), ReaderState::Disposed);
        let count = reader.logs().len();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(reader.logs().len(), count);
        assert!(matches!(reader.start(), Err(ReaderError::Disposed)));
    }

    #[test]
    fn test_dispose_before_start() {
        let reader = LogReader::new(memory_source(Vec::new()), desc()).unwrap();
        reader.dispose();
        assert_eq!(reader.state(), ReaderState::Disposed);
        assert!(matches!(reader.start(), Err(ReaderError::Disposed)));
    }

    #[test]
    fn test_clear_logs_keeps_state() {
        let reader = LogReader::new(memory_source(generate_lines(8, &mut rand::rng())), desc()).unwrap();
        read_to_end(&reader);
        reader.clear_logs();
        assert!(reader.logs().is_empty());
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_max_log_count_keeps_newest() {
        let mut desc = desc();
        desc.max_log_count = Some(100);
        desc.drop_log_count = 10;
        let reader = LogReader::new(memory_source(generate_lines(RECORD_COUNT, &mut rand::rng())), desc).unwrap();
        read_to_end(&reader);
        let logs = reader.logs();
        assert!(logs.len() <= 100);
        assert_eq!(logs.last().unwrap().id(), RECORD_COUNT as u64);
    }

    #[test]
    fn test_panic_while_reading_is_unclassified() {
        let mut lines = generate_lines(3, &mut rand::rng());
        lines.push(format!("2024-05-06 10-11-12.000 E broken: {}", PANIC_MESSAGE));
        lines.push("  [TAIL]".to_string());
        lines.extend(generate_lines(3, &mut rand::rng()));
        let mut desc = desc();
        desc.update_chunk_size = 1;
        let reader = LogReader::new(memory_source(lines), desc).unwrap();
        reader.start().unwrap();
        assert!(reader.wait_for_state(ReaderState::UnclassifiedError, TIMEOUT));
        let logs = reader.logs().snapshot();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[2].id(), 3);
        assert!(matches!(reader.start(), Err(ReaderError::InvalidOperation(_))));
    }

    #[test]
    fn test_pause_drops_records_until_resumed() {
        let reader = LogReader::new(LogDataSource::new(EndlessProvider), continuous_desc()).unwrap();
        reader.start().unwrap();
        assert!(reader.wait_for_state(ReaderState::ReadingLogs, TIMEOUT));
        assert!(reader.logs().wait_for_count_change(0, TIMEOUT) > 0);

        assert!(reader.pause());
        assert!(reader.pause());
        assert_eq!(reader.state(), ReaderState::Paused);
        std::thread::sleep(Duration::from_millis(50));
        let count = reader.logs().len();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(reader.logs().len(), count);

        assert!(reader.resume());
        assert_eq!(reader.state(), ReaderState::ReadingLogs);
        assert!(reader.logs().wait_for_count_change(count, TIMEOUT) > count);
    }

    #[test]
    fn test_pause_requires_continuous_reading() {
        let reader = LogReader::new(LogDataSource::new(EndlessProvider), desc()).unwrap();
        assert!(!reader.pause());
        reader.start().unwrap();
        assert!(reader.wait_for_state(ReaderState::ReadingLogs, TIMEOUT));
        assert!(!reader.pause());
        assert_eq!(reader.state(), ReaderState::ReadingLogs);
        assert!(reader.resume());
    }

    #[test]
    fn test_pause_while_opening() {
        let provider = WaitingProvider::new(generate_lines(4, &mut rand::rng()));
        let release = Arc::clone(&provider.release);
        let reader = LogReader::new(LogDataSource::new(provider), continuous_desc()).unwrap();
        let mut watch = reader.watch();
        reader.start().unwrap();
        assert!(reader.pause());
        assert_eq!(reader.state(), ReaderState::StartingWhenPaused);

        release.store(true, Ordering::Release);
        assert!(watch.wait_for(ReaderState::Paused, TIMEOUT));
        assert!(watch.wait_for(ReaderState::StartingWhenPaused, TIMEOUT));
        assert!(reader.logs().is_empty());

        assert!(reader.resume());
        assert!(reader.logs().wait_for_count_change(0, TIMEOUT) > 0);
        reader.dispose();
    }

    #[test]
    fn test_restart_clears_and_reads_again() {
        let provider = CountingProvider::new(generate_lines(8, &mut rand::rng()));
        let open_calls = Arc::clone(&provider.open_calls);
        let reader = LogReader::new(LogDataSource::new(provider), desc()).unwrap();
        read_to_end(&reader);
        assert_eq!(reader.logs().len(), 8);

        let mut watch = reader.watch();
        reader.restart().unwrap();
        assert!(watch.wait_for(ReaderState::Starting, TIMEOUT));
        assert!(watch.wait_for(ReaderState::Stopped, TIMEOUT));
        let ids: Vec<_> = reader.logs().snapshot().iter().map(|r| r.id()).collect();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
        assert_eq!(open_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_restart_replaces_running_reader() {
        let reader = LogReader::new(LogDataSource::new(EndlessProvider), continuous_desc()).unwrap();
        reader.start().unwrap();
        assert!(reader.logs().wait_for_count_change(0, TIMEOUT) > 0);
        assert!(reader.pause());

        reader.restart().unwrap();
        assert!(reader.wait_for_state(ReaderState::ReadingLogs, TIMEOUT));
        assert!(reader.logs().wait_for_count_change(0, TIMEOUT) > 0);
        // records of the new run start from the first id again
        assert_eq!(reader.logs().get(0).unwrap().id(), 1);
    }

    #[test]
    fn test_restart_while_opening() {
        let provider = WaitingProvider::new(generate_lines(4, &mut rand::rng()));
        let release = Arc::clone(&provider.release);
        let reader = LogReader::new(LogDataSource::new(provider), desc()).unwrap();
        reader.start().unwrap();
        reader.restart().unwrap();
        assert_eq!(reader.state(), ReaderState::Starting);
        release.store(true, Ordering::Release);
        assert!(reader.wait_for_state(ReaderState::Stopped, TIMEOUT));
        assert_eq!(reader.logs().len(), 4);
    }

    #[test]
    fn test_restart_from_preparing_and_after_dispose() {
        let reader = LogReader::new(memory_source(generate_lines(2, &mut rand::rng())), desc()).unwrap();
        reader.restart().unwrap();
        assert!(reader.wait_for_state(ReaderState::Stopped, TIMEOUT));
        assert_eq!(reader.logs().len(), 2);
        reader.dispose();
        assert!(matches!(reader.restart(), Err(ReaderError::Disposed)));
    }
}
