use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    fanout::FanoutHandle,
    protocol::Outgoing,
    transport::{error::TransportError, Transport},
};

/// The reader gave up on its transport.
#[derive(Debug)]
pub(crate) struct ReaderLost {
    /// Which session the reader belonged to.
    pub(crate) generation: u64,

    pub(crate) error: TransportError,
}

/// Everything a reader needs besides the transport.
pub(crate) struct Reader {
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) fanout: FanoutHandle,
    pub(crate) lost: mpsc::UnboundedSender<ReaderLost>,
}

impl Reader {
    /// Poll the transport until cancelled or until it fails.
    ///
    /// The transport is handed back so the owner can close it.
    pub(crate) async fn run(self, mut transport: Transport) -> Transport {
        debug!(%transport, "Reading");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Cancelled");
                    break;
                }

                polled = transport.poll() => match polled {
                    Ok(Some(frame)) if !frame.is_empty() => {
                        trace!(%frame, "Read");
                        self.fanout.broadcast(Outgoing::Frame(frame));
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "Transport lost");

                        // If the session is gone there is nobody to tell.
                        let _ = self.lost.send(ReaderLost {
                            generation: self.generation,
                            error,
                        });
                        break;
                    }
                }
            }
        }

        transport
    }
}
