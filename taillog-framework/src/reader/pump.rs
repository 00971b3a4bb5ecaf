use super::{ReaderShared, ReaderState, cancel::CancelToken};
use crate::{
    line_source::{DualBufferLineSource, EndReason},
    provider::OpenError,
    record::LogRecord,
    record_builder::RecordBuilder,
};
use log::{debug, error, warn};
use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};
use taillog_parser::PatternMatcher;

enum PumpOutcome {
    Completed(Option<EndReason>),
    Cancelled,
}

/// Body of the reading thread: open, pump, and restart while continuous.
/// `cancel` belongs to this run only, a restart replaces it.
pub(super) fn run(shared: Arc<ReaderShared>, cancel: Arc<CancelToken>) {
    let mut builder = RecordBuilder::new(&shared.desc, shared.source.file_name());
    loop {
        if !read_once(&shared, &cancel, &mut builder) {
            return;
        }
        if !shared.desc.is_continuous_reading {
            return;
        }

        let mut delay = shared.desc.restart_delay;
        if shared.logs.is_empty() {
            delay = delay.max(shared.desc.restart_delay_when_empty);
        }
        if !delay.is_zero() {
            debug!("{}: restart reading logs {} ms later", shared.name, delay.as_millis());
            if !cancel.sleep(delay) {
                return;
            }
        }
        // a concurrent start() may have won, the thread carries on either way
        let state = shared.state.update(|state| match state {
            ReaderState::Stopped | ReaderState::ReadingLogs => Some(ReaderState::Starting),
            ReaderState::Paused => Some(ReaderState::StartingWhenPaused),
            _ => None,
        });
        if !state.is_starting() || cancel.is_cancelled() {
            return;
        }
    }
}

/// Move from a starting state to `to`, or from a reading state when
/// `reading` is set.
fn fail(shared: &ReaderShared, reading: bool, to: ReaderState) {
    shared.state.update(|state| {
        let leaving = if reading { state.is_reading() } else { state.is_starting() };
        leaving.then_some(to)
    });
}

/// One open-read-close cycle starting in a starting state. True if it ended
/// in `Stopped`, or in `Paused` for a reader paused while reading.
fn read_once(shared: &Arc<ReaderShared>, cancel: &CancelToken, builder: &mut RecordBuilder) -> bool {
    let source_state = shared.source.state();
    if source_state.is_error() {
        error!(
            "{}: data source state is {:?} when starting reading logs",
            shared.name, source_state
        );
        fail(shared, false, ReaderState::DataSourceError);
        return false;
    }

    debug!("{}: start opening reader", shared.name);
    let reader = match shared.source.open_reader(shared.desc.open_timeout, cancel.flag()) {
        Ok(reader) => reader,
        Err(OpenError::Cancelled) => return false,
        Err(err) => {
            error!("{}: unable to open reader: {}", shared.name, err);
            fail(shared, false, ReaderState::DataSourceError);
            return false;
        }
    };

    let state = shared.state.update(|state| match state {
        ReaderState::Starting => Some(ReaderState::ReadingLogs),
        ReaderState::StartingWhenPaused => Some(ReaderState::Paused),
        _ => None,
    });
    if !state.is_reading() {
        warn!("{}: state changed to {:?} when opening reader", shared.name, state);
        return false;
    }

    let fill_name = format!("{}-fill", shared.name);
    let lines = match DualBufferLineSource::with_name(
        Box::new(reader),
        shared.desc.buffer_capacity,
        &fill_name,
    ) {
        Ok(lines) => lines,
        Err(err) => {
            error!("{}: unable to create line source: {}", shared.name, err);
            fail(shared, true, ReaderState::UnclassifiedError);
            return false;
        }
    };
    *shared.line_source.lock() = Some(lines.handle());
    if cancel.is_cancelled() {
        lines.dispose();
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pump(shared, cancel, lines, builder)));
    shared.line_source.lock().take();

    let end = match outcome {
        Ok(PumpOutcome::Completed(end)) => end,
        Ok(PumpOutcome::Cancelled) => return false,
        Err(panic) => {
            error!(
                "{}: error occurred while reading logs: {}",
                shared.name,
                panic_message(panic.as_ref())
            );
            fail(shared, true, ReaderState::UnclassifiedError);
            return false;
        }
    };
    if let Some(EndReason::ReadFailed(reason)) = end {
        warn!("{}: reading stopped early: {}", shared.name, reason);
    }

    let source_state = shared.source.state();
    if source_state.is_error() {
        error!("{}: data source state is {:?} after reading logs", shared.name, source_state);
        fail(shared, true, ReaderState::DataSourceError);
        return false;
    }
    // a paused reader stays paused across cycles
    let state = shared
        .state
        .transition(ReaderState::ReadingLogs, ReaderState::Stopped);
    matches!(state, ReaderState::Stopped | ReaderState::Paused)
}

fn pump(
    shared: &ReaderShared,
    cancel: &CancelToken,
    mut lines: DualBufferLineSource,
    builder: &mut RecordBuilder,
) -> PumpOutcome {
    let desc = &shared.desc;
    let mut matcher = PatternMatcher::new(desc.patterns.clone());
    let mut pending = Vec::new();
    let mut last_flush = Instant::now();

    debug!("{}: start reading logs", shared.name);
    loop {
        if cancel.is_cancelled() {
            return PumpOutcome::Cancelled;
        }
        // nothing buffered means the next read may block, publish what we have
        if !pending.is_empty() && !lines.has_buffered_line() {
            flush(shared, &mut pending);
            last_flush = Instant::now();
        }
        let Some(line) = lines.read_line() else {
            break;
        };
        if let Some(fields) = matcher.push_line(&line)
            && let Some(record) = builder.build(fields)
        {
            pending.push(record);
        }
        if pending.len() >= desc.update_chunk_size
            || (!pending.is_empty() && last_flush.elapsed() >= desc.update_interval)
        {
            flush(shared, &mut pending);
            last_flush = Instant::now();
        }
    }
    if cancel.is_cancelled() {
        return PumpOutcome::Cancelled;
    }

    if let Some(fields) = matcher.finish()
        && let Some(record) = builder.build(fields)
    {
        pending.push(record);
    }
    flush(shared, &mut pending);
    debug!(
        "{}: complete reading logs, {} lines, {} records, {} dropped",
        shared.name,
        matcher.lines_read(),
        matcher.completed_records(),
        matcher.dropped_records()
    );
    PumpOutcome::Completed(lines.end_reason().cloned())
}

fn flush(shared: &ReaderShared, pending: &mut Vec<LogRecord>) {
    if pending.is_empty() {
        return;
    }
    let records = mem::take(pending);
    let state = shared.state.get();
    if !state.can_add_logs() {
        debug!("{}: drop {} records read in state {:?}", shared.name, records.len(), state);
        return;
    }
    shared.logs.extend(records);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
