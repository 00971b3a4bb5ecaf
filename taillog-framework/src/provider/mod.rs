//! Data-source abstractions.
//!
//! A concrete source only has to answer two questions, implemented through
//! [`LogProvider`]:
//!
//! - `prepare()`: is the target there at all?
//! - `open()`: hand me a line stream.
//!
//! [`LogDataSource`] wraps a provider with the shared state machine every
//! reader relies on:
//!
//! ```text
//! Preparing ──> ReadyToOpenReader ──> OpeningReader ──> ReaderOpened
//!     │                ^                    │                │
//!     │                └──── ClosingReader <┼────────────────┘
//!     │                                     │
//!     └──> SourceNotFound / ExternalDependencyNotFound / UnclassifiedError (sticky)
//! ```
//!
//! Error states are sticky: once a source failed, every later reader over the
//! same instance sees the error without another open attempt.

mod registry;
mod source;

pub use registry::{SourceOptions, SourceRegistry};
pub use source::{DataSourceState, LogDataSource, SourceReader};

use std::{
    io::{self, BufRead},
    sync::{Arc, atomic::AtomicBool},
};
use thiserror::Error;

/// callable that unblocks a pending [`LineRead::read_line`] from another thread
pub type AbortHandle = Arc<dyn Fn() + Send + Sync>;

/// blocking line-oriented input stream
pub trait LineRead: Send {
    /// next line without its terminator, `Ok(None)` at end of stream
    fn read_line(&mut self) -> io::Result<Option<String>>;

    fn abort_handle(&self) -> Option<AbortHandle> {
        None
    }
}

impl<T: LineRead + ?Sized> LineRead for Box<T> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        (**self).read_line()
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        (**self).abort_handle()
    }
}

/// [`LineRead`] over any [`BufRead`], invalid UTF-8 is replaced
pub struct BufLineReader<R> {
    inner: R,
    buf: Vec<u8>,
    abort: Option<AbortHandle>,
}

impl<R: BufRead + Send> BufLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            abort: None,
        }
    }

    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }
}

impl<R: BufRead + Send> LineRead for BufLineReader<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.clone()
    }
}

/// outcome of [`LogProvider::prepare`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preparation {
    Ready,
    NotFound(String),
    DependencyNotFound(String),
    Error(String),
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("log source not found: {0}")]
    NotFound(String),

    #[error("external dependency not found: {0}")]
    DependencyNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),

    #[error("data source is not available, state: {0:?}")]
    Unavailable(DataSourceState),

    #[error("timed out waiting for the data source")]
    Timeout,

    #[error("opening was cancelled")]
    Cancelled,
}

/// Capability interface of a concrete log source (file, process, socket...).
///
/// The provider is owned by a [`LogDataSource`] and is only ever called from
/// one thread at a time. Both calls may block.
pub trait LogProvider: Send {
    /// short name used as log prefix, e.g. `file`
    fn kind(&self) -> &'static str;

    /// check the target once before the first open
    fn prepare(&mut self) -> Preparation;

    /// Open a line stream.
    ///
    /// `cancelled` is set when the reader waiting for the stream goes away. An
    /// open that waits (for a client, a retry, a device) must poll it and
    /// return [`OpenError::Cancelled`] once it is set.
    fn open(&mut self, cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError>;

    /// file name attached to records read from this source
    fn file_name(&self) -> Option<String> {
        None
    }
}
