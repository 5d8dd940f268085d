//! The transport adapter: a uniform way to open, poll, write and close
//! the byte channel to the device.
//!
//! There are exactly two kinds of transport, see [`Transport`].
//! Opening gives two halves: the [`Transport`] which is polled and closed,
//! and its [`TransportInput`] which is written to. Each half has a single
//! owner, so a slow write never holds up reading.
//! Once [`Transport::close`] has been called the transport is gone,
//! so no poll can follow it.

use std::{fmt::Display, time::Duration};

use crate::{config::TransportMode, error::Error, frame::Frame};

/// Transport related errors.
pub mod error;

/// Codecs for decoding transport output.
pub(crate) mod codecs;

/// A directly opened serial port.
pub(crate) mod serial;

/// A spawned monitor process.
pub(crate) mod process;

use self::{
    error::TransportError,
    process::{ProcessInput, SpawnedProcess},
    serial::{DirectSerial, SerialInput},
};

/// The reading side of the byte channel to the device.
pub(crate) enum Transport {
    /// The serial device itself, read on a fixed tick.
    DirectSerial(DirectSerial),

    /// A process which talks to the device for us.
    SpawnedProcess(SpawnedProcess),
}

/// The writing side of the byte channel to the device.
pub(crate) enum TransportInput {
    /// See [`Transport::DirectSerial`].
    DirectSerial(SerialInput),

    /// See [`Transport::SpawnedProcess`].
    SpawnedProcess(ProcessInput),
}

impl Transport {
    /// Open a transport of the configured kind.
    pub(crate) fn open(
        mode: &TransportMode,
        port: &str,
        baud: u32,
        poll_interval: Duration,
    ) -> Result<(Self, TransportInput), Error> {
        match mode {
            TransportMode::DirectSerial => {
                let (serial, input) = DirectSerial::open(port, baud, poll_interval)?;
                Ok((
                    Self::DirectSerial(serial),
                    TransportInput::DirectSerial(input),
                ))
            }
            TransportMode::SpawnedProcess(command) => {
                let (process, input) = SpawnedProcess::open(command, port, baud)?;
                Ok((
                    Self::SpawnedProcess(process),
                    TransportInput::SpawnedProcess(input),
                ))
            }
        }
    }

    /// Get the next frame.
    ///
    /// `Ok(None)` means nothing was available this time.
    /// This is cancel safe: dropping the future loses no output.
    pub(crate) async fn poll(&mut self) -> Result<Option<Frame>, TransportError> {
        match self {
            Transport::DirectSerial(serial) => serial.poll().await,
            Transport::SpawnedProcess(process) => process.poll().await,
        }
    }

    /// Release the underlying handle.
    /// The [`TransportInput`] should be dropped before this is called.
    pub(crate) async fn close(self) {
        match self {
            Transport::DirectSerial(serial) => serial.close(),
            Transport::SpawnedProcess(process) => process.close().await,
        }
    }
}

impl TransportInput {
    /// Put these bytes on the wire.
    ///
    /// Not cancel safe: if dropped, part of the bytes may have been written.
    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self {
            TransportInput::DirectSerial(serial) => serial.write(bytes).await,
            TransportInput::SpawnedProcess(process) => process.write(bytes).await,
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::DirectSerial(_) => write!(f, "direct serial"),
            Transport::SpawnedProcess(_) => write!(f, "spawned process"),
        }
    }
}
