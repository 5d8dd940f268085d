use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    frame::OutgoingBytes,
    transport::{error::TransportError, TransportInput},
};

/// Bytes to put on the wire, and where to say how it went.
#[derive(Debug)]
pub(crate) struct WriteRequest {
    pub(crate) bytes: OutgoingBytes,
    pub(crate) reply: oneshot::Sender<Result<(), TransportError>>,
}

/// Everything a writer needs besides the transport input.
pub(crate) struct Writer {
    pub(crate) cancel: CancellationToken,
    pub(crate) writes: mpsc::UnboundedReceiver<WriteRequest>,
}

impl Writer {
    /// Perform writes one at a time, in the order they were queued,
    /// until cancelled.
    ///
    /// A write in flight is abandoned on cancel. Whatever is still queued
    /// is failed by dropping it.
    /// The input is dropped on return.
    pub(crate) async fn run(mut self, mut input: TransportInput) {
        loop {
            let WriteRequest { bytes, reply } = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                request = self.writes.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let result = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(len = bytes.len(), "Cancelled mid write");
                    let _ = reply.send(Err(TransportError::Closed));
                    break;
                }

                result = input.write(&bytes) => result,
            };

            match &result {
                Ok(()) => trace!(len = bytes.len(), "Wrote"),
                Err(e) => warn!(%e, "Write failed"),
            }

            // The requester may have given up waiting.
            let _ = reply.send(result);
        }

        debug!("Writer done");
    }
}
