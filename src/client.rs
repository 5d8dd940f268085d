use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace};

use crate::{
    error::Error,
    protocol::{Ack, ControlMessage, Kind, Notice, Outgoing},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Unrequested things the bridge sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Device output.
    Text(String),

    /// Something happened to the session.
    Notice(Notice),
}

/// A subscriber talking to a running bridge.
///
/// Acknowledgements are matched up with requests,
/// everything else is available through [`ClientHandle::next_output`].
pub struct ClientHandle {
    sink: SplitSink<Socket, tungstenite::Message>,
    acks: mpsc::UnboundedReceiver<Ack>,
    output: mpsc::UnboundedReceiver<Output>,
    reader: JoinHandle<()>,
}

async fn read(
    mut stream: futures::stream::SplitStream<Socket>,
    acks: mpsc::UnboundedSender<Ack>,
    output: mpsc::UnboundedSender<Output>,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(tungstenite::Message::Text(text)) => text,
            Ok(tungstenite::Message::Close(_)) => break,
            Ok(other) => {
                trace!(?other, "Ignoring");
                continue;
            }
            Err(e) => {
                error!(?e, "Socket error");
                break;
            }
        };

        let delivered = match Outgoing::from_text(&text) {
            Outgoing::Ack(ack) => acks.send(ack).is_ok(),
            Outgoing::Notice(notice) => output.send(Output::Notice(notice)).is_ok(),
            Outgoing::Frame(frame) => output.send(Output::Text(frame.into_string())).is_ok(),
        };

        if !delivered {
            break;
        }
    }

    debug!("Bridge connection closed");
}

impl ClientHandle {
    /// Join the bridge at the given address and port.
    pub async fn new(address: &str, port: u16) -> Result<Self, Error> {
        Self::join(format!("ws://{address}:{port}/api/serial/ws")).await
    }

    /// Join the bridge and open a device port right away.
    ///
    /// Whether opening worked is reported like for [`ClientHandle::connect`],
    /// so await it with [`ClientHandle::next_ack`].
    pub async fn new_connecting(
        address: &str,
        port: u16,
        device: &str,
        baud: u32,
    ) -> Result<Self, Error> {
        Self::join(format!(
            "ws://{address}:{port}/api/serial/ws?port={device}&baudRate={baud}"
        ))
        .await
    }

    async fn join(url: String) -> Result<Self, Error> {
        debug!(%url, "Joining");
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Websocket(format!("Could not join {url}: {e}")))?;

        let (sink, stream) = socket.split();
        let (acks_tx, acks) = mpsc::unbounded_channel();
        let (output_tx, output) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read(stream, acks_tx, output_tx));

        Ok(Self {
            sink,
            acks,
            output,
            reader,
        })
    }

    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| Error::Websocket(e.to_string()))
    }

    /// Wait for the next acknowledgement.
    pub async fn next_ack(&mut self) -> Result<Ack, Error> {
        self.acks
            .recv()
            .await
            .ok_or_else(|| Error::Websocket("The bridge went away".into()))
    }

    async fn request(&mut self, message: ControlMessage) -> Result<bool, Error> {
        let kind = message.kind();
        self.send_text(message.serialize()).await?;

        let ack = self.next_ack().await?;
        if ack.kind != kind {
            return Err(Error::Websocket(format!(
                "Expected a {kind:?} acknowledgement, got {ack:?}"
            )));
        }

        Ok(ack.success)
    }

    /// Open a device port. Whether it worked is returned.
    pub async fn connect(&mut self, device: &str, baud: u32) -> Result<bool, Error> {
        self.request(ControlMessage::connect(device, baud)).await
    }

    /// Close the device port.
    pub async fn disconnect(&mut self) -> Result<bool, Error> {
        self.request(ControlMessage::disconnect()).await
    }

    /// Write to the device.
    pub async fn send<S: Into<String>>(&mut self, data: S) -> Result<bool, Error> {
        self.request(ControlMessage::send(data)).await
    }

    /// Write text to the device without wrapping it in a control message.
    pub async fn send_raw<S: Into<String>>(&mut self, text: S) -> Result<bool, Error> {
        self.send_text(text.into()).await?;

        let ack = self.next_ack().await?;
        Ok(ack.kind == Kind::Send && ack.success)
    }

    /// The next device output or notice.
    /// `None` when the bridge is gone.
    pub async fn next_output(&mut self) -> Option<Output> {
        self.output.recv().await
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
