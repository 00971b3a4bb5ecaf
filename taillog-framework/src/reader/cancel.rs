use parking_lot::{Condvar, Mutex};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

/// one-shot cancellation flag with interruptible sleeps
#[derive(Default)]
pub(crate) struct CancelToken {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancelToken {
    pub(crate) fn cancel(&self) {
        let _guard = self.lock.lock();
        self.cancelled.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.cancelled
    }

    /// false if cancelled before `duration` elapsed
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.lock.lock();
        while !self.is_cancelled() {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        !self.is_cancelled()
    }
}
