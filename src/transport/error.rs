use std::io;

use thiserror::Error;

/// Problems an open transport may run into.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// The serial device went away.
    #[error("Serial port disconnected")]
    Disconnected,

    /// The monitor process closed its output.
    #[error("Monitor process exited (status: {0:?})")]
    ProcessExited(Option<i32>),

    /// The transport was closed while a write was in flight.
    #[error("Transport closed before the write finished")]
    Closed,
}
