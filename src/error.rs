use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::error::TransportError;

/// Errors thay may occur in this library.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// The configuration did not validate.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The transport could not be opened.
    /// Bad port, bad baud rate, or the device is busy.
    #[error("Could not open `{port}`. Problem: {problem}")]
    TransportOpen {
        /// The port (or monitor target) which was asked for.
        port: String,

        /// Why opening failed.
        problem: String,
    },

    /// Reading from or writing to an open transport failed.
    #[error("Transport I/O problem: {0}")]
    TransportIo(String),

    /// An operation needed an open session but there was none.
    #[error("No transport is open")]
    NotConnected,

    /// The external toolchain could not be run.
    #[error("Toolchain problem: {0}")]
    Toolchain(String),

    /// A workspace file operation failed.
    #[error("Storage problem: {0}")]
    Storage(String),

    /// The HTTP server could not start or stopped with an error.
    #[error("Server problem: {0}")]
    Server(String),

    /// A client could not talk to the bridge.
    #[error("Websocket problem: {0}")]
    Websocket(String),

    /// The request did not conform to valid usage.
    #[error("The request did not conform to valid usage. Problem: `{0}`")]
    BadUsage(String),
}

impl Error {
    /// Get the message of a [`Error::BadConfig`], if that is the variant.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    pub(crate) fn transport_open(port: &str, problem: impl ToString) -> Self {
        Self::TransportOpen {
            port: port.to_owned(),
            problem: problem.to_string(),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::TransportIo(e.to_string())
    }
}
