use thiserror::Error;

/// errors raised at the call site of a [`LogReader`](crate::LogReader) operation
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("log reader has been disposed")]
    Disposed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to spawn reading thread: {0}")]
    Spawn(#[from] std::io::Error),
}
