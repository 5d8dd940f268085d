use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    fanout::FanoutHandle,
    protocol::{Ack, ControlMessage, Request},
    session::SessionHandle,
    subscriber::Subscriber,
};

pub(crate) struct Peer {
    // Which subscriber does this peer represent
    subscriber: Subscriber,

    // Where to put acks
    acks: mpsc::UnboundedSender<Ack>,

    // For reading requests to us
    peer_requests_receiver: mpsc::UnboundedReceiver<PeerRequest>,

    session: SessionHandle,
    fanout: FanoutHandle,

    // Used when a connect does not name a baud rate
    default_baud: u32,
}

#[derive(Debug)]
pub(crate) enum PeerRequest {
    Subscriber(Request),
    Shutdown,
}

pub(crate) struct PeerHandle {
    pub(crate) requests: mpsc::UnboundedSender<PeerRequest>,
    pub(crate) join_handle: JoinHandle<()>,
}

impl PeerHandle {
    pub(crate) fn new(
        subscriber: Subscriber,
        acks: mpsc::UnboundedSender<Ack>,
        session: SessionHandle,
        fanout: FanoutHandle,
        default_baud: u32,
    ) -> Self {
        let (peer_requests_sender, peer_requests_receiver) = mpsc::unbounded_channel();

        let mut peer = Peer {
            subscriber,
            acks,
            peer_requests_receiver,
            session,
            fanout,
            default_baud,
        };

        let join_handle = tokio::spawn(async move { peer.run().await }.instrument(info_span!("Peer")));

        Self {
            requests: peer_requests_sender,
            join_handle,
        }
    }

    pub(crate) fn send(&self, request: Request) {
        self.requests
            .send(PeerRequest::Subscriber(request))
            .expect("Task should be alive");
    }

    pub(crate) async fn shutdown(self) {
        debug!("Shutting down");
        self.requests
            .send(PeerRequest::Shutdown)
            .expect("Task should be alive");

        self.join_handle.await.expect("Peer should not panic");
        debug!("Shutdown complete");
    }
}

impl Peer {
    /// The subscriber is expected to be registered with the fanout already,
    /// it is unregistered once the peer is done.
    async fn run(&mut self) {
        while let Some(peer_request) = self.peer_requests_receiver.recv().await {
            match peer_request {
                PeerRequest::Subscriber(request) => {
                    let span = info_span!("Request", %request);
                    let ack = self.handle(request).instrument(span).await;

                    if self.acks.send(ack).is_err() {
                        debug!("Socket gone, ack dropped");
                    }
                }
                PeerRequest::Shutdown => {
                    debug!("Shutting down peer");
                    break;
                }
            }
        }

        self.fanout.unregister(self.subscriber.id);
    }

    async fn handle(&mut self, request: Request) -> Ack {
        let kind = request.kind();

        let result = match request {
            Request::Control(ControlMessage::Connect { port, baud_rate }) => {
                let baud = baud_rate.unwrap_or(self.default_baud);
                self.session.connect(&port, baud).await
            }
            Request::Control(ControlMessage::Disconnect {}) => self.session.disconnect().await,
            Request::Control(ControlMessage::Send { data }) => {
                self.session.send(data.into_bytes()).await
            }
            Request::Passthrough(bytes) => self.session.send(bytes).await,
        };

        match &result {
            Ok(()) => info!("Done"),
            Err(e) => warn!(%e, "Failed"),
        }

        Ack::new(kind, result.is_ok())
    }
}
