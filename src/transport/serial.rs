use std::{io, time::Duration};

use futures::FutureExt;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    time::{self, Interval, MissedTickBehavior},
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace};

use crate::{error::Error, frame::Frame, transport::error::TransportError};

/// How much to read in one go. A poll keeps reading until the port is drained.
const READ_CHUNK: usize = 1024;

/// A serial device opened directly.
///
/// Every poll waits for the next tick, then drains whatever the port
/// has buffered into a single frame.
pub(crate) struct DirectSerial {
    path: String,
    stream: ReadHalf<SerialStream>,
    tick: Interval,
    scratch: [u8; READ_CHUNK],
}

/// The writing side of a [`DirectSerial`].
pub(crate) struct SerialInput(WriteHalf<SerialStream>);

fn try_create_serial_port(path: &str, baud: u32) -> Result<SerialStream, Error> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(Duration::ZERO)
        .open_native_async()
        .map_err(|e| Error::transport_open(path, e))
}

impl DirectSerial {
    pub(crate) fn open(
        path: &str,
        baud: u32,
        poll_interval: Duration,
    ) -> Result<(Self, SerialInput), Error> {
        info!(%path, %baud, "Opening serial port");

        let (stream, sink) = tokio::io::split(try_create_serial_port(path, baud)?);

        let mut tick = time::interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let serial = Self {
            path: path.to_owned(),
            stream,
            tick,
            scratch: [0; READ_CHUNK],
        };

        Ok((serial, SerialInput(sink)))
    }

    pub(crate) async fn poll(&mut self) -> Result<Option<Frame>, TransportError> {
        self.tick.tick().await;

        let mut drained = vec![];

        loop {
            // Never wait here: only take what is already buffered.
            match self.stream.read(&mut self.scratch).now_or_never() {
                None => break,
                Some(Ok(0)) => return Err(TransportError::Disconnected),
                Some(Ok(n)) => drained.extend_from_slice(&self.scratch[..n]),
                Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                Some(Err(e)) => return Err(e.into()),
            }
        }

        if drained.is_empty() {
            return Ok(None);
        }

        trace!("Drained {} byte(s) from {}", drained.len(), self.path);
        Ok(Some(Frame::new_lossy(drained)))
    }

    /// The port is released once the [`SerialInput`] is dropped too.
    pub(crate) fn close(self) {
        debug!(path = %self.path, "Closing serial port");
        drop(self.stream);
    }
}

impl SerialInput {
    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.0.write_all(bytes).await?;
        self.0.flush().await?;

        Ok(())
    }
}
