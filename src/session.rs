//! The single transport session and the task which owns it.
//!
//! Only the session task touches session state. Everyone else, subscribers
//! and the reader task alike, talks to it through messages, so commands
//! from different subscribers are applied one at a time in arrival order.
//!
//! A `connect` while a session is open tears the open one down completely
//! (reader and writer stopped and joined, transport closed) before the new
//! transport is opened.
//!
//! Writes are performed by a writer task of their own, and the session task
//! never waits for one to finish. Reading, status requests and disconnects
//! go on while a write is stuck on a device which does not take input.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    config::Config,
    error::Error,
    events::{Events, SessionEvent, TimestampedEvent},
    fanout::FanoutHandle,
    frame::OutgoingBytes,
    protocol::{Notice, Outgoing},
    transport::{error::TransportError, Transport},
};

/// The task which reads from an open transport.
pub(crate) mod reader;

/// The task which writes to an open transport.
pub(crate) mod writer;

use self::{
    reader::{Reader, ReaderLost},
    writer::{WriteRequest, Writer},
};

/// How many session events are kept around.
const EVENT_LOG_SIZE: usize = 100;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No transport.
    Closed,

    /// A transport is being opened.
    Opening,

    /// A transport is open and being read.
    Open,

    /// The transport is being released.
    Closing,
}

/// A snapshot of the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    /// The state.
    pub state: SessionState,

    /// The open port, if any.
    pub port: Option<String>,

    /// The baud rate of the open port, if any.
    pub baud: Option<u32>,

    /// How many subscribers are registered.
    pub subscribers: usize,
}

/// Resolves once a queued write is done.
type Written = oneshot::Receiver<Result<(), TransportError>>;

#[derive(Debug)]
enum Action {
    Connect {
        port: String,
        baud: u32,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Send {
        bytes: OutgoingBytes,
        reply: oneshot::Sender<Result<Written, Error>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Events {
        reply: oneshot::Sender<broadcast::Receiver<TimestampedEvent>>,
    },
    RecentEvents {
        reply: oneshot::Sender<Vec<TimestampedEvent>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Connect { port, baud, .. } => write!(f, "connect {port} @ {baud}"),
            Action::Disconnect { .. } => write!(f, "disconnect"),
            Action::Send { bytes, .. } => write!(f, "send {} bytes", bytes.len()),
            Action::Status { .. } => write!(f, "status"),
            Action::Events { .. } => write!(f, "events"),
            Action::RecentEvents { .. } => write!(f, "recent events"),
            Action::Shutdown { .. } => write!(f, "shutdown"),
        }
    }
}

/// A handle to the session task.
///
/// Cloning is cheap, and every clone talks to the same session.
/// The task stops (closing any open transport) once all handles are dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle(mpsc::UnboundedSender<Action>);

impl SessionHandle {
    /// Start a closed session.
    /// Frames and status notices are delivered through the given fanout.
    pub fn new(config: &Config, fanout: FanoutHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();

        let mut session = Session {
            config: config.clone(),
            fanout,
            events: Events::new(EVENT_LOG_SIZE),
            state: State::Closed,
            generation: 0,
            shutting_down: false,
            requests: rx,
            lost_tx,
            lost_rx,
        };

        tokio::spawn(async move { session.run().await }.instrument(info_span!("Session")));

        Self(tx)
    }

    async fn perform<T>(&self, action: impl FnOnce(oneshot::Sender<T>) -> Action) -> T {
        let (tx, rx) = oneshot::channel();
        self.0.send(action(tx)).expect("Session task should be alive");

        rx.await.expect("Session should always reply")
    }

    /// Open the port, closing any open session first.
    pub async fn connect(&self, port: &str, baud: u32) -> Result<(), Error> {
        let port = port.to_owned();
        self.perform(|reply| Action::Connect { port, baud, reply })
            .await
    }

    /// Close the open session.
    /// Succeeds if there is none.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.perform(|reply| Action::Disconnect { reply }).await
    }

    /// Write to the open session.
    /// Fails right away if there is none.
    ///
    /// Waits for the write to finish, which a disconnect cuts short.
    pub async fn send(&self, bytes: OutgoingBytes) -> Result<(), Error> {
        let written = self.perform(|reply| Action::Send { bytes, reply }).await?;

        match written.await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(TransportError::Closed.into()),
        }
    }

    /// Where the session is at.
    pub async fn status(&self) -> SessionStatus {
        self.perform(|reply| Action::Status { reply }).await
    }

    /// Subscribe to session events.
    pub async fn events(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.perform(|reply| Action::Events { reply }).await
    }

    /// The latest session events, newest first.
    pub async fn recent_events(&self) -> Vec<TimestampedEvent> {
        self.perform(|reply| Action::RecentEvents { reply }).await
    }

    /// Close any open session and refuse to open new ones.
    pub async fn shutdown(&self) {
        self.perform(|reply| Action::Shutdown { reply }).await
    }
}

struct OpenSession {
    port: String,
    baud: u32,
    generation: u64,
    cancel: CancellationToken,
    writes: mpsc::UnboundedSender<WriteRequest>,
    reader: JoinHandle<Transport>,
    writer: JoinHandle<()>,
}

enum State {
    Closed,
    Open(OpenSession),
}

struct Session {
    config: Config,
    fanout: FanoutHandle,
    events: Events,

    state: State,

    // Bumped per opened transport, so a late report from an old reader
    // can't close a newer session.
    generation: u64,

    shutting_down: bool,

    requests: mpsc::UnboundedReceiver<Action>,

    // Readers report here.
    lost_tx: mpsc::UnboundedSender<ReaderLost>,
    lost_rx: mpsc::UnboundedReceiver<ReaderLost>,
}

impl Session {
    async fn run(&mut self) {
        loop {
            tokio::select! {
                action = self.requests.recv() => {
                    let Some(action) = action else { break };

                    let span = info_span!("Action", %action);
                    self.handle(action).instrument(span).await;
                }
                Some(lost) = self.lost_rx.recv() => self.transport_lost(lost).await,
            }
        }

        debug!("All handles dropped");
        self.close().await;
    }

    async fn handle(&mut self, action: Action) {
        match action {
            Action::Connect { port, baud, reply } => {
                let result = self.connect(port, baud).await;
                let _ = reply.send(result);
            }
            Action::Disconnect { reply } => {
                self.close().await;
                let _ = reply.send(Ok(()));
            }
            Action::Send { bytes, reply } => {
                let _ = reply.send(self.send(bytes));
            }
            Action::Status { reply } => {
                let status = self.status().await;
                let _ = reply.send(status);
            }
            Action::Events { reply } => {
                let _ = reply.send(self.events.subscribe());
            }
            Action::RecentEvents { reply } => {
                let _ = reply.send(self.events.recent());
            }
            Action::Shutdown { reply } => {
                info!("Shutting down");
                self.shutting_down = true;
                self.close().await;
                let _ = reply.send(());
            }
        }
    }

    async fn connect(&mut self, port: String, baud: u32) -> Result<(), Error> {
        if self.shutting_down {
            return Err(Error::BadUsage("The bridge is shutting down".into()));
        }

        self.close().await;

        self.events.send_event(SessionEvent::Opening {
            port: port.clone(),
            baud,
        });

        let opened = if baud == 0 {
            Err(Error::transport_open(&port, "The baud rate can't be zero"))
        } else {
            Transport::open(
                &self.config.transport,
                &port,
                baud,
                self.config.poll_interval(),
            )
        };

        let (transport, input) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(%e, "Open failed");
                self.events.send_event(SessionEvent::OpenFailed {
                    port,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        self.generation += 1;
        let generation = self.generation;

        let cancel = CancellationToken::new();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();

        let reader = Reader {
            generation,
            cancel: cancel.clone(),
            fanout: self.fanout.clone(),
            lost: self.lost_tx.clone(),
        };

        let reader = tokio::spawn(
            reader
                .run(transport)
                .instrument(info_span!("reader", %port, %generation)),
        );

        let writer = Writer {
            cancel: cancel.clone(),
            writes: writes_rx,
        };

        let writer = tokio::spawn(
            writer
                .run(input)
                .instrument(info_span!("writer", %port, %generation)),
        );

        self.events.send_event(SessionEvent::Opened { port: port.clone() });

        self.state = State::Open(OpenSession {
            port,
            baud,
            generation,
            cancel,
            writes: writes_tx,
            reader,
            writer,
        });

        Ok(())
    }

    /// Stop the reader and writer, wait for both, then release the transport.
    async fn close(&mut self) {
        let State::Open(open) = std::mem::replace(&mut self.state, State::Closed) else {
            return;
        };

        let port = open.port.clone();
        self.events.send_event(SessionEvent::Closing { port: port.clone() });

        Self::release(open).await;

        self.events.send_event(SessionEvent::Closed { port });
    }

    async fn release(open: OpenSession) {
        open.cancel.cancel();

        // The input goes first, closing stdin of a monitor process.
        if let Err(e) = open.writer.await {
            error!(%e, "Writer task failed");
        }

        match open.reader.await {
            Ok(transport) => {
                debug!(%transport, "Closing transport");
                transport.close().await;
            }
            Err(e) => error!(%e, "Reader task failed, transport dropped"),
        }
    }

    /// Queue a write, without waiting for it.
    fn send(&self, bytes: OutgoingBytes) -> Result<Written, Error> {
        let State::Open(open) = &self.state else {
            debug!("Nothing open, not sending");
            return Err(Error::NotConnected);
        };

        let (tx, rx) = oneshot::channel();

        open.writes
            .send(WriteRequest { bytes, reply: tx })
            .map_err(|_| Error::from(TransportError::Closed))?;

        Ok(rx)
    }

    async fn status(&self) -> SessionStatus {
        let subscribers = self.fanout.count().await;

        match &self.state {
            State::Closed => SessionStatus {
                state: SessionState::Closed,
                port: None,
                baud: None,
                subscribers,
            },
            State::Open(open) => SessionStatus {
                state: SessionState::Open,
                port: Some(open.port.clone()),
                baud: Some(open.baud),
                subscribers,
            },
        }
    }

    async fn transport_lost(&mut self, ReaderLost { generation, error }: ReaderLost) {
        let open = match &self.state {
            State::Open(open) if open.generation == generation => open,
            _ => {
                debug!(%generation, "Stale report from an old reader");
                return;
            }
        };

        let port = open.port.clone();
        let reason = Error::from(error).to_string();

        self.events.send_event(SessionEvent::TransportLost {
            port: port.clone(),
            reason: reason.clone(),
        });

        self.close().await;

        self.fanout.broadcast(Outgoing::Notice(Notice::Status {
            state: SessionState::Closed,
            port,
            reason,
        }));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::{MonitorCommand, TransportMode},
        frame::Frame,
        subscriber::Subscriber,
    };

    fn config(program: &str, args: &[&str]) -> Config {
        Config {
            transport: TransportMode::SpawnedProcess(MonitorCommand {
                program: program.into(),
                args: args.iter().map(|arg| arg.to_string()).collect(),
                forward_input: true,
            }),
            ..Default::default()
        }
    }

    fn loopback() -> Config {
        config("cat", &[])
    }

    fn session_with_subscriber(config: &Config) -> (SessionHandle, broadcast::Receiver<Outgoing>) {
        let fanout = FanoutHandle::new();
        let rx = fanout.register(&Subscriber::new("test"));

        (SessionHandle::new(config, fanout), rx)
    }

    async fn next(rx: &mut broadcast::Receiver<Outgoing>) -> Outgoing {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Should receive in time")
            .expect("Should not lag or be closed")
    }

    /// A mebibyte of text, in lines of a kibibyte.
    fn mebibyte_of_lines() -> Vec<u8> {
        let mut line = vec![b'x'; 1023];
        line.push(b'\n');

        line.repeat(1024)
    }

    fn spawn_send(session: &SessionHandle, bytes: Vec<u8>) -> JoinHandle<Result<(), Error>> {
        let session = session.clone();
        tokio::spawn(async move { session.send(bytes).await })
    }

    async fn next_event(rx: &mut broadcast::Receiver<TimestampedEvent>) -> SessionEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Should receive in time")
            .expect("Should be an event")
            .inner
    }

    #[tokio::test]
    async fn send_while_closed_fails() {
        let (session, _rx) = session_with_subscriber(&loopback());

        assert_eq!(
            session.send(b"hello".to_vec()).await,
            Err(Error::NotConnected)
        );
        assert_eq!(session.status().await.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (session, _rx) = session_with_subscriber(&loopback());

        session.connect("loop", 9600).await.unwrap();
        session.disconnect().await.unwrap();

        let mut events = session.events().await;
        session.disconnect().await.unwrap();

        assert_eq!(session.status().await.state, SessionState::Closed);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn written_bytes_come_back_through_the_fanout() {
        let (session, mut rx) = session_with_subscriber(&loopback());

        session.connect("loop", 9600).await.unwrap();
        session.send(b"LED_ON\n".to_vec()).await.unwrap();

        assert_eq!(next(&mut rx).await, Outgoing::Frame(Frame::from("LED_ON")));

        let status = session.status().await;
        assert_eq!(status.state, SessionState::Open);
        assert_eq!(status.port.as_deref(), Some("loop"));
        assert_eq!(status.baud, Some(9600));
        assert_eq!(status.subscribers, 1);
    }

    #[tokio::test]
    async fn connect_closes_the_previous_session_first() {
        let (session, _rx) = session_with_subscriber(&loopback());
        let mut events = session.events().await;

        session.connect("first", 9600).await.unwrap();
        session.connect("second", 115_200).await.unwrap();

        let expected = vec![
            SessionEvent::Opening {
                port: "first".into(),
                baud: 9600,
            },
            SessionEvent::Opened {
                port: "first".into(),
            },
            SessionEvent::Closing {
                port: "first".into(),
            },
            SessionEvent::Closed {
                port: "first".into(),
            },
            SessionEvent::Opening {
                port: "second".into(),
                baud: 115_200,
            },
            SessionEvent::Opened {
                port: "second".into(),
            },
        ];

        let mut seen = vec![];
        for _ in 0..expected.len() {
            seen.push(next_event(&mut events).await);
        }

        assert_eq!(seen, expected);
        assert_eq!(session.status().await.port.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn failed_open_stays_closed() {
        let (session, _rx) = session_with_subscriber(&config("/definitely/not/a/program", &[]));

        let err = session.connect("nowhere", 9600).await.unwrap_err();

        assert!(matches!(err, Error::TransportOpen { .. }));
        assert_eq!(session.status().await.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn zero_baud_is_refused() {
        let (session, _rx) = session_with_subscriber(&loopback());

        let err = session.connect("loop", 0).await.unwrap_err();

        assert!(matches!(err, Error::TransportOpen { .. }));
    }

    #[tokio::test]
    async fn transport_loss_closes_the_session_and_tells_subscribers() {
        let (session, mut rx) =
            session_with_subscriber(&config("sh", &["-c", "echo last words"]));

        session.connect("dying", 9600).await.unwrap();

        assert_eq!(
            next(&mut rx).await,
            Outgoing::Frame(Frame::from("last words"))
        );

        let Outgoing::Notice(Notice::Status { state, port, reason }) = next(&mut rx).await else {
            panic!("Expected a status notice");
        };
        assert_eq!(state, SessionState::Closed);
        assert_eq!(port, "dying");
        assert!(reason.contains("exited"), "{reason}");

        assert_eq!(session.status().await.state, SessionState::Closed);
        assert_eq!(
            session.send(b"anyone?".to_vec()).await,
            Err(Error::NotConnected)
        );
    }

    #[tokio::test]
    async fn shutdown_closes_and_refuses_new_sessions() {
        let (session, _rx) = session_with_subscriber(&loopback());

        session.connect("loop", 9600).await.unwrap();
        session.shutdown().await;

        assert_eq!(session.status().await.state, SessionState::Closed);
        assert!(matches!(
            session.connect("loop", 9600).await,
            Err(Error::BadUsage(_))
        ));
    }

    #[tokio::test]
    async fn a_large_write_does_not_hold_up_the_session() {
        let (session, _rx) = session_with_subscriber(&loopback());
        session.connect("loop", 9600).await.unwrap();

        let sending = spawn_send(&session, mebibyte_of_lines());

        let status = timeout(Duration::from_secs(3), session.status())
            .await
            .expect("Status should answer while writing");
        assert_eq!(status.state, SessionState::Open);

        timeout(Duration::from_secs(10), sending)
            .await
            .expect("Write should finish since the echo is being read")
            .unwrap()
            .unwrap();

        timeout(Duration::from_secs(3), session.disconnect())
            .await
            .expect("Disconnect should finish")
            .unwrap();
        assert_eq!(session.status().await.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn disconnect_cuts_a_stuck_write_short() {
        // Never reads its input, so a large write can't finish.
        let (session, _rx) = session_with_subscriber(&config("sh", &["-c", "exec sleep 5"]));
        session.connect("stuck", 9600).await.unwrap();

        let sending = spawn_send(&session, mebibyte_of_lines());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = timeout(Duration::from_secs(3), session.status())
            .await
            .expect("Status should answer while a write is stuck");
        assert_eq!(status.state, SessionState::Open);

        timeout(Duration::from_secs(3), session.disconnect())
            .await
            .expect("Disconnect should not wait for the write")
            .unwrap();

        let sent = timeout(Duration::from_secs(1), sending)
            .await
            .expect("The write should be failed")
            .unwrap();
        assert_eq!(sent, Err(Error::from(TransportError::Closed)));
    }

    #[cfg(target_os = "linux")]
    mod direct_serial {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::transport::serial::fake_device::FakeDevice;

        fn serial() -> Config {
            Config {
                transport: TransportMode::DirectSerial,
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn device_output_is_one_frame_with_its_newline() {
            let mut device = FakeDevice::new();
            let (session, mut rx) = session_with_subscriber(&serial());

            session.connect(&device.path, 9600).await.unwrap();
            device.emit(b"ack\n").unwrap();

            assert_eq!(next(&mut rx).await, Outgoing::Frame(Frame::from("ack\n")));
        }

        #[tokio::test]
        async fn sent_bytes_reach_the_device() {
            let mut device = FakeDevice::new();
            let (session, _rx) = session_with_subscriber(&serial());

            session.connect(&device.path, 9600).await.unwrap();
            session.send(b"LED_ON\n".to_vec()).await.unwrap();

            assert_eq!(device.received(7).await, b"LED_ON\n");
        }

        #[tokio::test]
        async fn nothing_is_read_after_disconnect() {
            let mut device = FakeDevice::new();
            let (session, mut rx) = session_with_subscriber(&serial());

            session.connect(&device.path, 9600).await.unwrap();
            session.disconnect().await.unwrap();

            // With the port closed this may not even be accepted.
            let _ = device.emit(b"late\n");

            assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
            assert_eq!(session.status().await.state, SessionState::Closed);
        }

        #[tokio::test]
        async fn unplugging_closes_the_session_and_tells_subscribers() {
            let mut device = FakeDevice::new();
            let (session, mut rx) = session_with_subscriber(&serial());

            session.connect(&device.path, 9600).await.unwrap();
            device.unplug();

            let Outgoing::Notice(Notice::Status { state, port, .. }) = next(&mut rx).await else {
                panic!("Expected a status notice");
            };
            assert_eq!(state, SessionState::Closed);
            assert_eq!(port, device.path);

            assert_eq!(session.status().await.state, SessionState::Closed);
        }
    }
}
