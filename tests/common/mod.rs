#![allow(dead_code)]

use std::{collections::VecDeque, time::Duration};

use axum::http::StatusCode;
use color_eyre::{eyre::eyre, Result};
use futures::{SinkExt, StreamExt};
use serial_bridge::{
    config::{Config, MonitorCommand, TransportMode},
    protocol::{Ack, ControlMessage, Kind, Notice, Outgoing},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A configuration where the "device" is a process running the given program.
pub fn process_config(program: &str, args: &[&str]) -> Config {
    Config {
        transport: TransportMode::SpawnedProcess(MonitorCommand {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            forward_input: true,
        }),
        ..Default::default()
    }
}

/// A device which echoes every line written to it.
pub fn loopback_config() -> Config {
    process_config("cat", &[])
}

/// Start a server, returning the port it listens on.
pub async fn start(config: Config) -> u16 {
    serial_bridge::logging::init(None).await;

    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move { serial_bridge::server::run_any_port(config, port_tx).await });

    port_rx
        .await
        .expect("Server should reply with allocated port")
}

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(port: u16, query: &str) -> Result<Socket> {
    info!("Connecting to server on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/api/serial/ws{query}"))
            .await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

pub async fn receive(socket: &mut Socket) -> Result<Outgoing> {
    let message = timeout(TIMEOUT, socket.next())
        .await?
        .ok_or_else(|| eyre!("Stream closed"))??;

    Ok(Outgoing::from_text(message.to_text()?))
}

/// A subscriber which keeps acknowledgements apart from everything else.
///
/// Acks and device output travel the same socket, and a frame caused by
/// a write may overtake the write's ack, so both sides are buffered.
pub struct Subscriber {
    pub socket: Socket,
    acks: VecDeque<Ack>,
    pushed: VecDeque<Outgoing>,
}

impl Subscriber {
    pub async fn join(port: u16) -> Result<Self> {
        Self::join_with(port, "").await
    }

    pub async fn join_with(port: u16, query: &str) -> Result<Self> {
        Ok(Self {
            socket: connect(port, query).await?,
            acks: VecDeque::new(),
            pushed: VecDeque::new(),
        })
    }

    async fn pump(&mut self) -> Result<()> {
        match receive(&mut self.socket).await? {
            Outgoing::Ack(ack) => self.acks.push_back(ack),
            other => self.pushed.push_back(other),
        }

        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.socket
            .send(tungstenite::Message::Text(text.into()))
            .await?;

        Ok(())
    }

    pub async fn request(&mut self, message: ControlMessage) -> Result<Ack> {
        self.send_text(&message.serialize()).await?;
        self.next_ack().await
    }

    pub async fn next_ack(&mut self) -> Result<Ack> {
        loop {
            if let Some(ack) = self.acks.pop_front() {
                return Ok(ack);
            }
            self.pump().await?;
        }
    }

    pub async fn next_pushed(&mut self) -> Result<Outgoing> {
        loop {
            if let Some(pushed) = self.pushed.pop_front() {
                return Ok(pushed);
            }
            self.pump().await?;
        }
    }

    pub async fn next_frame(&mut self) -> Result<String> {
        match self.next_pushed().await? {
            Outgoing::Frame(frame) => Ok(frame.into_string()),
            other => Err(eyre!("Expected a frame, got {other}")),
        }
    }

    pub async fn next_notice(&mut self) -> Result<Notice> {
        match self.next_pushed().await? {
            Outgoing::Notice(notice) => Ok(notice),
            other => Err(eyre!("Expected a notice, got {other}")),
        }
    }

    /// Nothing pushed within a short while.
    pub async fn assert_quiet(&mut self) -> Result<()> {
        assert!(self.pushed.is_empty(), "Buffered: {:?}", self.pushed);

        match timeout(Duration::from_millis(200), self.socket.next()).await {
            Err(_elapsed) => Ok(()),
            Ok(message) => Err(eyre!("Expected nothing, got {message:?}")),
        }
    }

    pub async fn connect(&mut self, device: &str) -> Result<Ack> {
        self.request(ControlMessage::connect(device, 9600)).await
    }

    pub async fn disconnect(&mut self) -> Result<Ack> {
        self.request(ControlMessage::disconnect()).await
    }

    pub async fn send(&mut self, data: &str) -> Result<Ack> {
        self.request(ControlMessage::send(data)).await
    }
}

pub fn ack(kind: Kind, success: bool) -> Ack {
    Ack::new(kind, success)
}

/// A bare HTTP/1.1 request, returning the status code and the body.
pub async fn http(port: u16, method: &str, path: &str, body: Option<&str>) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    let body = body.unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Connection: close\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    timeout(TIMEOUT, stream.read_to_string(&mut response)).await??;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| eyre!("No end of headers in {response:?}"))?;

    let status = head
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| eyre!("No status in {head:?}"))?
        .parse()?;

    Ok((status, body.to_owned()))
}

pub async fn get_json(port: u16, path: &str) -> Result<serde_json::Value> {
    let (status, body) = http(port, "GET", path, None).await?;
    assert_eq!(status, 200, "{body}");

    Ok(serde_json::from_str(&body)?)
}

pub async fn post_json(port: u16, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
    let (status, body) = http(port, "POST", path, Some(&body.to_string())).await?;
    assert_eq!(status, 200, "{body}");

    Ok(serde_json::from_str(&body)?)
}
