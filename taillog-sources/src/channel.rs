use crossbeam_channel::Receiver;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use taillog_framework::{AbortHandle, LineRead};

/// Lines produced by a background task. The stream ends when the producer
/// drops its sender; `should_stop` asks the producer to quit.
pub struct ChannelLineReader {
    receiver: Receiver<String>,
    should_stop: Arc<AtomicBool>,
}

impl ChannelLineReader {
    pub fn new(receiver: Receiver<String>, should_stop: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            should_stop,
        }
    }
}

impl LineRead for ChannelLineReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.receiver.recv().ok())
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        let should_stop = Arc::clone(&self.should_stop);
        Some(Arc::new(move || should_stop.store(true, Ordering::Release)))
    }
}

impl Drop for ChannelLineReader {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::Release);
    }
}
