use std::net::SocketAddr;

use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};

use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    config::Config,
    fanout::FanoutHandle,
    peer,
    protocol::{Ack, ControlMessage, Outgoing, Request},
    events::TimestampedEvent,
    session::SessionHandle,
    subscriber::Subscriber,
};

/// Optional query parameters when joining.
/// If a port is given the joining subscriber connects to it right away.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct JoinParams {
    port: Option<String>,

    #[serde(rename = "baudRate")]
    baud_rate: Option<u32>,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<JoinParams>,
    Extension(session): Extension<SessionHandle>,
    Extension(fanout): Extension<FanoutHandle>,
    Extension(config): Extension<Config>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| {
        let subscriber = Subscriber::new(&addr.to_string());

        let span = info_span!("Subscriber", %subscriber);

        handle_websocket(socket, subscriber, session, fanout, config.default_baud, params)
            .instrument(span)
    })
}

pub(crate) async fn read<S>(mut receiver: S, peer_handle: peer::PeerHandle)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                trace!(%text, "subscriber message");
                peer_handle.send(Request::from_text(&text));
            }
            Message::Binary(bytes) => {
                trace!(len = bytes.len(), "subscriber sent binary data");
                peer_handle.send(Request::Passthrough(bytes));
            }
            Message::Ping(_) => {
                debug!("socket ping");
            }
            Message::Pong(_) => {
                debug!("socket pong");
            }
            Message::Close(_) => {
                debug!("subscriber disconnected");
            }
        }
    }

    peer_handle.shutdown().await;

    debug!("no more stuff");
}

/// Forward acks and pushed messages to the socket.
/// A subscriber which falls too far behind misses the oldest pushed messages.
pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut acks: mpsc::UnboundedReceiver<Ack>,
    mut pushed: broadcast::Receiver<Outgoing>,
) {
    loop {
        let outgoing = tokio::select! {
            Some(ack) = acks.recv() => Outgoing::Ack(ack),
            received = pushed.recv() => match received {
                Ok(outgoing) => outgoing,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%skipped, "Subscriber lagging, dropped oldest");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("No longer registered");
                    return;
                }
            },
        };

        trace!(%outgoing, "Outgoing");

        if sender.send(Message::Text(outgoing.into_text())).await.is_err() {
            debug!("subscriber disconnected");
            return;
        }
    }
}

pub(crate) async fn handle_websocket(
    websocket: WebSocket,
    subscriber: Subscriber,
    session: SessionHandle,
    fanout: FanoutHandle,
    default_baud: u32,
    params: JoinParams,
) {
    let (stream_sender, stream_receiver) = websocket.split();
    let (ack_sender, ack_receiver) = mpsc::unbounded_channel();

    // Registered before any request is handled, so acked means registered.
    let pushed = fanout.register(&subscriber);

    let peer_handle = peer::PeerHandle::new(subscriber, ack_sender, session, fanout, default_baud);

    if let Some(port) = params.port {
        debug!(%port, "Connecting on join");
        peer_handle.send(Request::Control(ControlMessage::Connect {
            port,
            baud_rate: params.baud_rate,
        }));
    }

    let read_handle = tokio::spawn(read(stream_receiver, peer_handle).instrument(info_span!("Read")));
    let write_handle =
        tokio::spawn(write(stream_sender, ack_receiver, pushed).instrument(info_span!("Write")));

    match read_handle.await {
        Ok(()) => debug!("Read task joined"),
        Err(e) => warn!("Read task join error: {e:?}"),
    }

    debug!("Aborting write task");
    // This ensures the underlying TCP connection gets closed,
    // which signals the subscriber that the session is over.
    write_handle.abort();
}

/// Streams session events as JSON.
/// The recent history is sent first, oldest first.
pub(crate) async fn events_handler(
    ws: WebSocketUpgrade,
    Extension(session): Extension<SessionHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| send_events(socket, session).instrument(info_span!("Events")))
}

async fn send_events(mut socket: WebSocket, session: SessionHandle) {
    // Subscribe first so nothing falls between the history and the live stream.
    let live = session.events().await;
    let mut history = session.recent_events().await;
    history.reverse();

    let newest_seen = history.last().map(|event| event.seq);

    for event in history {
        if socket.send(event_message(&event)).await.is_err() {
            return;
        }
    }

    let mut live = BroadcastStream::new(live);

    while let Some(event) = live.next().await {
        let event = match event {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(%skipped, "Events watcher lagging");
                continue;
            }
        };

        if already_sent(newest_seen, &event) {
            continue;
        }

        if socket.send(event_message(&event)).await.is_err() {
            debug!("Events watcher left");
            return;
        }
    }
}

/// Whether the event was part of the history, whose newest event is given.
fn already_sent(newest_seen: Option<u64>, event: &TimestampedEvent) -> bool {
    newest_seen.map_or(false, |newest| event.seq <= newest)
}

fn event_message(event: &TimestampedEvent) -> Message {
    Message::Text(serde_json::to_string(event).expect("Should serialize well"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::events::SessionEvent;

    #[test]
    fn events_sharing_a_timestamp_are_told_apart() {
        let sent = TimestampedEvent::new(SessionEvent::Opened { port: "COM3".into() }, 7);

        let mut next = sent.clone();
        next.inner = SessionEvent::Closing { port: "COM3".into() };
        next.seq = 8;
        assert_eq!(next.timestamp, sent.timestamp);

        assert!(already_sent(Some(sent.seq), &sent));
        assert!(!already_sent(Some(sent.seq), &next));
        assert!(!already_sent(None, &sent));
    }
}
